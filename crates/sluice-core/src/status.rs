//! Status vocabulary shared by executions, stages, and steps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Skipped,
    Blocked,
    Declined,
    #[serde(rename = "waiting_on_dependencies")]
    WaitingOnDeps,
    #[default]
    Pending,
    Running,
    Success,
    Failure,
    Error,
    Killed,
}

impl Status {
    /// Terminal statuses. A done record is never transitioned again.
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            Status::Skipped
                | Status::Declined
                | Status::Success
                | Status::Failure
                | Status::Error
                | Status::Killed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Status::Failure | Status::Error | Status::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Skipped => "skipped",
            Status::Blocked => "blocked",
            Status::Declined => "declined",
            Status::WaitingOnDeps => "waiting_on_dependencies",
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Error => "error",
            Status::Killed => "killed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skipped" => Ok(Status::Skipped),
            "blocked" => Ok(Status::Blocked),
            "declined" => Ok(Status::Declined),
            "waiting_on_dependencies" => Ok(Status::WaitingOnDeps),
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            "error" => Ok(Status::Error),
            "killed" => Ok(Status::Killed),
            other => Err(crate::Error::Serialization(format!(
                "unknown status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_and_failed_sets() {
        let done: Vec<_> = [
            Status::Skipped,
            Status::Blocked,
            Status::Declined,
            Status::WaitingOnDeps,
            Status::Pending,
            Status::Running,
            Status::Success,
            Status::Failure,
            Status::Error,
            Status::Killed,
        ]
        .into_iter()
        .filter(Status::is_done)
        .collect();

        assert_eq!(
            done,
            vec![
                Status::Skipped,
                Status::Declined,
                Status::Success,
                Status::Failure,
                Status::Error,
                Status::Killed
            ]
        );
        assert!(Status::Killed.is_failed());
        assert!(!Status::Skipped.is_failed());
        assert!(!Status::Blocked.is_done());
    }

    #[test]
    fn test_status_strings_match_serde() {
        for status in [Status::WaitingOnDeps, Status::Killed, Status::Pending] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("queued".parse::<Status>().is_err());
    }
}
