use crate::core::error::DubError;
use crate::core::state::{Line, LineStatus};

/// A status transition applied to one line. The artifact/error pairing is
/// enforced here so no caller can leave a line in a contradictory state.
#[derive(Debug, Clone)]
pub enum StatusChange {
    Pending,
    Generating,
    Completed { artifact: String },
    Error { message: String },
}

/// In-memory ordered collection of dubbing lines; the single source of truth
/// the scheduler reads and mutates. Mutations are last-writer-wins per index;
/// the scheduler serializes concurrent writers.
#[derive(Debug, Default, Clone)]
pub struct LineRepository {
    lines: Vec<Line>,
}

impl LineRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines(lines: Vec<Line>) -> Self {
        Self { lines }
    }

    pub fn get(&self, index: usize) -> Result<&Line, DubError> {
        self.lines
            .iter()
            .find(|l| l.index == index)
            .ok_or(DubError::LineNotFound(index))
    }

    pub fn list(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.status == LineStatus::Completed)
            .count()
    }

    pub fn set_status(&mut self, index: usize, change: StatusChange) -> Result<(), DubError> {
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.index == index)
            .ok_or(DubError::LineNotFound(index))?;

        match change {
            StatusChange::Pending => {
                line.status = LineStatus::Pending;
                line.output_artifact = None;
                line.last_error = None;
            }
            StatusChange::Generating => {
                line.status = LineStatus::Generating;
                line.output_artifact = None;
                line.last_error = None;
            }
            StatusChange::Completed { artifact } => {
                line.status = LineStatus::Completed;
                line.output_artifact = Some(artifact);
                line.last_error = None;
            }
            StatusChange::Error { message } => {
                line.status = LineStatus::Error;
                line.output_artifact = None;
                line.last_error = Some(message);
            }
        }
        Ok(())
    }

    /// A fresh parse supersedes the previous lines, discarding their
    /// status history.
    pub fn replace_lines(&mut self, lines: Vec<Line>) {
        self.lines = lines;
    }
}

/// Result of parsing pasted script text.
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub lines: Vec<Line>,
    /// Distinct role names in first-seen order, for seeding role configs.
    pub roles: Vec<String>,
}

/// Parse script text into lines, one `role<delimiter>content` pair per row.
///
/// Indices are row ordinals in the input, so blank rows leave gaps; that
/// keeps a line's index stable when surrounding blank rows are edited. Rows
/// without a delimiter become content-only lines with an empty role.
pub fn parse_script(text: &str, delimiter: &str) -> ParsedScript {
    let mut lines = Vec::new();
    let mut roles: Vec<String> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (role, content) = match raw.split_once(delimiter) {
            Some((role, content)) => (role.trim(), content.trim()),
            None => ("", raw),
        };

        if !role.is_empty() && !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
        lines.push(Line::new(index, role, content));
    }

    ParsedScript { lines, roles }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_assigns_row_ordinals_and_collects_roles() {
        let script = parse_script("hero|Hello\n\nvillain|Hmph\nhero|Again", "|");

        assert_eq!(script.lines.len(), 3);
        assert_eq!(script.lines[0].index, 0);
        // The blank row keeps its ordinal, so the next line is row 2.
        assert_eq!(script.lines[1].index, 2);
        assert_eq!(script.lines[1].role, "villain");
        assert_eq!(script.lines[2].index, 3);
        assert_eq!(script.roles, vec!["hero", "villain"]);
    }

    #[test]
    fn parse_row_without_delimiter_is_content_only() {
        let script = parse_script("Just narration here", "|");
        assert_eq!(script.lines.len(), 1);
        assert_eq!(script.lines[0].role, "");
        assert_eq!(script.lines[0].content, "Just narration here");
        assert!(script.roles.is_empty());
    }

    #[test]
    fn parse_empty_text_yields_nothing() {
        let script = parse_script("   \n\n  ", "|");
        assert!(script.lines.is_empty());
        assert!(script.roles.is_empty());
    }

    #[test]
    fn set_status_enforces_artifact_error_pairing() {
        let mut repo = LineRepository::from_lines(vec![Line::new(0, "hero", "hi")]);

        repo.set_status(
            0,
            StatusChange::Error {
                message: "boom".to_string(),
            },
        )
        .unwrap();
        let line = repo.get(0).unwrap();
        assert_eq!(line.status, LineStatus::Error);
        assert_eq!(line.last_error.as_deref(), Some("boom"));
        assert!(line.output_artifact.is_none());

        // Re-entering generating clears both terminal fields.
        repo.set_status(0, StatusChange::Generating).unwrap();
        let line = repo.get(0).unwrap();
        assert_eq!(line.status, LineStatus::Generating);
        assert!(line.last_error.is_none());
        assert!(line.output_artifact.is_none());

        repo.set_status(
            0,
            StatusChange::Completed {
                artifact: "0000_hero.wav".to_string(),
            },
        )
        .unwrap();
        let line = repo.get(0).unwrap();
        assert_eq!(line.status, LineStatus::Completed);
        assert_eq!(line.output_artifact.as_deref(), Some("0000_hero.wav"));
        assert!(line.last_error.is_none());
    }

    #[test]
    fn unknown_index_is_not_found() {
        let mut repo = LineRepository::new();
        assert!(matches!(repo.get(7), Err(DubError::LineNotFound(7))));
        assert!(matches!(
            repo.set_status(7, StatusChange::Pending),
            Err(DubError::LineNotFound(7))
        ));
    }

    #[test]
    fn replace_lines_discards_history() {
        let mut repo = LineRepository::from_lines(vec![Line::new(0, "hero", "hi")]);
        repo.set_status(
            0,
            StatusChange::Completed {
                artifact: "old.wav".to_string(),
            },
        )
        .unwrap();

        repo.replace_lines(parse_script("hero|new text", "|").lines);
        let line = repo.get(0).unwrap();
        assert_eq!(line.status, LineStatus::Pending);
        assert!(line.output_artifact.is_none());
        assert_eq!(line.content, "new text");
    }
}
