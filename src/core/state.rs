use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of one dubbing line.
///
/// `Completed` and `Error` are terminal per attempt but re-enterable: a
/// re-requested line goes back through `Generating`. There is no cancelled
/// state; a line interrupted by a stopped run keeps whatever state its last
/// finished transition left it in.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Error,
}

/// One unit of dubbing work: a role speaking a piece of text.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Line {
    /// Stable ordinal identity, assigned at parse time, never reused.
    pub index: usize,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub status: LineStatus,
    /// Set only while `status` is `Completed`.
    #[serde(default)]
    pub output_artifact: Option<String>,
    /// Set only while `status` is `Error`.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Line {
    pub fn new(index: usize, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            index,
            role: role.into(),
            content: content.into(),
            status: LineStatus::Pending,
            output_artifact: None,
            last_error: None,
        }
    }
}

pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 2.0;

/// Per-role synthesis parameters.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RoleConfig {
    pub role: String,
    /// Identity of the sample audio conditioning synthesis for this role.
    /// Absence is an expected configuration error, not a hazard.
    #[serde(default)]
    pub reference_voice: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_speed() -> f64 {
    1.0
}

impl RoleConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            reference_voice: None,
            speed: default_speed(),
        }
    }

    pub fn clamped_speed(&self) -> f64 {
        self.speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

/// Persisted snapshot of one project: its lines plus configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProjectData {
    pub name: String,
    #[serde(default)]
    pub server_url: String,
    #[serde(default = "default_project_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub role_configs: HashMap<String, RoleConfig>,
}

fn default_project_concurrency() -> usize {
    5
}

impl ProjectData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_url: String::new(),
            concurrency: default_project_concurrency(),
            lines: Vec::new(),
            role_configs: HashMap::new(),
        }
    }

    /// Crash recovery: a process that died mid-run may have persisted lines
    /// in `Generating`. Reset them to `Pending` so they are re-runnable.
    pub fn normalize(&mut self) {
        for line in &mut self.lines {
            if line.status == LineStatus::Generating {
                line.status = LineStatus::Pending;
                line.output_artifact = None;
                line.last_error = None;
            }
        }
    }
}
