use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Terminal disposition of one process lifetime. A run left RUNNING in the
/// store is marked CRASHED by the next startup's reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Killed,
    Crashed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Killed => "KILLED",
            RunStatus::Crashed => "CRASHED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "KILLED" => Ok(RunStatus::Killed),
            "CRASHED" => Ok(RunStatus::Crashed),
            _ => anyhow::bail!("Invalid run status: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// A persisted error row, attributed to the run it occurred in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub run_id: String,
    pub error_type: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}
