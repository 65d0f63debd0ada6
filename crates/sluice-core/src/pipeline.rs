//! Pipeline and pipeline document types.
//!
//! Documents arrive already parsed from the repository configuration; the
//! core only reads them.

use crate::ids::{PipelineId, RepoId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The repository a pipeline belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    /// Full path of the repository, e.g. `space/project/repo`.
    pub path: String,
    /// Maximum concurrently admitted stages for this repository. Zero is unlimited.
    #[serde(default)]
    pub throttle: u32,
}

/// A configured pipeline. `seq` is the last execution number handed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub repo_id: RepoId,
    pub uid: String,
    pub config_path: String,
    pub seq: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub version: i64,
}

/// The parsed documents of one pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub documents: Vec<Document>,
}

/// One pipeline document; becomes one stage when it matches a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub trigger: Conditions,
    #[serde(default)]
    pub concurrency: Concurrency,
    /// Agent labels this document must be routed to.
    #[serde(default)]
    pub node: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: Vec<DocumentStep>,
}

fn default_kind() -> String {
    "pipeline".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub variant: String,
    /// Kernel version, e.g. `1809` for Windows hosts.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Concurrency {
    #[serde(default)]
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStep {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub detach: bool,
}

/// Trigger conditions of a document. Each condition is evaluated on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub branch: Condition,
    #[serde(default)]
    pub event: Condition,
    #[serde(default)]
    pub action: Condition,
    #[serde(default, rename = "ref")]
    pub git_ref: Condition,
    #[serde(default)]
    pub repo: Condition,
    #[serde(default)]
    pub cron: Condition,
    #[serde(default)]
    pub status: Condition,
}

/// Include/exclude glob lists. A bare list is shorthand for `include`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConditionRepr")]
pub struct Condition {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Condition {
    pub fn include(patterns: &[&str]) -> Self {
        Self {
            include: patterns.iter().map(|p| p.to_string()).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn exclude(patterns: &[&str]) -> Self {
        Self {
            include: Vec::new(),
            exclude: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConditionRepr {
    Single(String),
    List(Vec<String>),
    Full {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl From<ConditionRepr> for Condition {
    fn from(repr: ConditionRepr) -> Self {
        match repr {
            ConditionRepr::Single(pattern) => Condition {
                include: vec![pattern],
                exclude: Vec::new(),
            },
            ConditionRepr::List(include) => Condition {
                include,
                exclude: Vec::new(),
            },
            ConditionRepr::Full { include, exclude } => Condition { include, exclude },
        }
    }
}
