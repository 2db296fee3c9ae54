//! Task and thought status enums
//!
//! Statuses are persisted as lowercase strings (SQLite convention used
//! throughout the runtime), so each enum round-trips through `as_str` /
//! `parse`.

use serde::{Deserialize, Serialize};

/// Status of a unit of agent work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Deferred,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal statuses cannot be left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Deferred
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "active" => Ok(TaskStatus::Active),
            "deferred" => Ok(TaskStatus::Deferred),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    Pending,
    Processing,
    Completed,
    Deferred,
    Failed,
}

impl ThoughtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtStatus::Pending => "pending",
            ThoughtStatus::Processing => "processing",
            ThoughtStatus::Completed => "completed",
            ThoughtStatus::Deferred => "deferred",
            ThoughtStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThoughtStatus::Completed | ThoughtStatus::Deferred | ThoughtStatus::Failed
        )
    }
}

impl std::str::FromStr for ThoughtStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ThoughtStatus::Pending),
            "processing" => Ok(ThoughtStatus::Processing),
            "completed" => Ok(ThoughtStatus::Completed),
            "deferred" => Ok(ThoughtStatus::Deferred),
            "failed" => Ok(ThoughtStatus::Failed),
            other => Err(format!("unknown thought status: {other}")),
        }
    }
}

impl std::fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a thought came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtType {
    /// Seeded by an observer from an inbound message.
    Observation,
    /// Created from wise-authority feedback on a deferred thought.
    Correction,
    /// Created by a scheduled trigger.
    Scheduled,
    /// Follow-up created by the processor (ponder path).
    FollowUp,
}

impl ThoughtType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtType::Observation => "observation",
            ThoughtType::Correction => "correction",
            ThoughtType::Scheduled => "scheduled",
            ThoughtType::FollowUp => "followup",
        }
    }
}

impl std::str::FromStr for ThoughtType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(ThoughtType::Observation),
            "correction" => Ok(ThoughtType::Correction),
            "scheduled" => Ok(ThoughtType::Scheduled),
            "followup" => Ok(ThoughtType::FollowUp),
            other => Err(format!("unknown thought type: {other}")),
        }
    }
}

impl std::fmt::Display for ThoughtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Deferred,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
        assert!(TaskStatus::Deferred.is_terminal());
        assert!(ThoughtStatus::Failed.is_terminal());
        assert!(!ThoughtStatus::Processing.is_terminal());
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("running".parse::<TaskStatus>().is_err());
        assert!("".parse::<ThoughtStatus>().is_err());
    }
}
