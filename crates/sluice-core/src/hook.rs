//! Trigger payloads.

use crate::ids::ExecutionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known trigger sources.
pub const TRIGGER_HOOK: &str = "@hook";
pub const TRIGGER_CRON: &str = "@cron";
pub const TRIGGER_MANUAL: &str = "@manual";

/// What caused an execution: a push, a pull request, a cron tick, or a
/// manual request. Copied onto the execution it creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub trigger: String,
    pub triggered_by: String,
    pub event: String,
    #[serde(default)]
    pub action: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub source: String,
    /// Branch the change lands on; branch conditions are matched against it.
    pub target: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub cron: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author_login: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub parent: Option<ExecutionId>,
}
