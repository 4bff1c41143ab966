//! Job progress state machine

use std::fmt;

/// Lifecycle state of a job
///
/// ```text
/// queued ──first outcome──> running ──done+failed ≥ total──> done
///    └──────────── single-URL job completes ────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Done,
}

impl JobState {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// The state implied by a job's counters
    pub fn for_progress(done: u64, failed: u64, total: u64) -> Self {
        let processed = done + failed;
        if processed >= total {
            Self::Done
        } else if processed > 0 {
            Self::Running
        } else {
            Self::Queued
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
