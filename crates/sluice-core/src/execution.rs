//! Execution, stage, and step records.

use crate::ids::{ExecutionId, PipelineId, RepoId, StageId, StepId};
use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage limit for error messages on executions, stages, and steps.
pub const MAX_ERROR_LEN: usize = 500;

/// Storage limit for commit titles and messages copied onto an execution.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Truncate `value` in place to at most `max` characters.
pub fn truncate(value: &mut String, max: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
}

/// One triggered run of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub repo_id: RepoId,
    pub pipeline_id: PipelineId,
    pub number: i64,
    pub status: Status,
    pub error: String,
    pub trigger: String,
    pub event: String,
    pub action: String,
    pub cron: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub source: String,
    pub target: String,
    pub before: String,
    pub after: String,
    pub title: String,
    pub message: String,
    pub author_login: String,
    pub author_name: String,
    pub author_email: String,
    pub sender: String,
    pub params: BTreeMap<String, String>,
    pub debug: bool,
    pub parent: Option<ExecutionId>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
    /// Populated on read; never persisted with the execution row.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
}

/// A schedulable unit of an execution, claimed and run by a single agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub execution_id: ExecutionId,
    pub repo_id: RepoId,
    pub number: i64,
    pub name: String,
    pub kind: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    pub status: Status,
    pub error: String,
    pub err_ignore: bool,
    pub exit_code: i32,
    /// Name of the agent that claimed this stage; empty while unclaimed.
    pub machine: String,
    pub os: String,
    pub arch: String,
    pub variant: String,
    pub kernel: String,
    /// Maximum concurrently admitted stages sharing this repo and name. Zero is unlimited.
    pub limit: u32,
    /// Maximum concurrently admitted stages of this repo. Zero is unlimited.
    pub limit_repo: u32,
    pub on_success: bool,
    pub on_failure: bool,
    pub depends_on: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

/// A single command run inside a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub stage_id: StageId,
    pub number: i64,
    pub name: String,
    pub status: Status,
    pub error: String,
    pub err_ignore: bool,
    pub exit_code: i32,
    pub image: String,
    pub detached: bool,
    pub depends_on: Vec<String>,
    pub started: Option<DateTime<Utc>>,
    pub stopped: Option<DateTime<Utc>>,
    pub version: i64,
}

/// One line of live step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub number: u64,
    pub message: String,
    /// Seconds since the step started.
    pub timestamp: i64,
}
