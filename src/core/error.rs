use thiserror::Error;

/// Everything that can go wrong while driving dubbing work.
///
/// Per-line failures (`MissingReferenceVoice`, `Transport`, `Engine`) are
/// absorbed by the scheduler and recorded on the line itself; they never
/// abort sibling attempts. The structural variants (`LineNotFound`,
/// `RunActive`, `InvalidEndpoint`, `ProjectNotFound`) abort the whole
/// operation before any line state is touched.
#[derive(Debug, Error)]
pub enum DubError {
    /// The line's role has no reference voice assigned. Detected before
    /// dispatch, never reaches the synthesis engine.
    #[error("role \"{role}\" has no reference voice configured")]
    MissingReferenceVoice { role: String },

    #[error("line {0} not found in the current project")]
    LineNotFound(usize),

    /// Could not reach the synthesis server at all.
    #[error("cannot reach synthesis server: {0}")]
    Transport(String),

    /// The server answered, but with a failure response.
    #[error("synthesis engine error: {0}")]
    Engine(String),

    #[error("a batch run is already active")]
    RunActive,

    #[error("invalid synthesis endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("project \"{0}\" not found")]
    ProjectNotFound(String),

    #[error("project \"{0}\" already exists")]
    ProjectExists(String),

    #[error("storage error: {0}")]
    Storage(String),
}
