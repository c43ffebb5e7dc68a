//! Batch processing mode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a batch of pending jobs is driven through the engine layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// One shared engine instance; jobs run one at a time in queue order.
    Sequential,
    /// A dedicated engine instance per job; all jobs run concurrently.
    Parallel,
}

impl Default for ProcessingMode {
    fn default() -> Self {
        ProcessingMode::Sequential
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Sequential => write!(f, "sequential"),
            ProcessingMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(ProcessingMode::Sequential),
            "parallel" => Ok(ProcessingMode::Parallel),
            other => Err(format!("unknown processing mode: {other}")),
        }
    }
}
