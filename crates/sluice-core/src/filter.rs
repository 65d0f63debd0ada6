//! Worker request filters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the stages an agent is able to run.
///
/// Empty platform fields mean the agent accepts any platform. Empty kind and
/// type default to `pipeline` and `docker` when matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    pub os: String,
    pub arch: String,
    pub variant: String,
    pub kernel: String,
    pub labels: BTreeMap<String, String>,
}

impl Filter {
    pub fn new(kind: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            stage_type: stage_type.into(),
            ..Default::default()
        }
    }

    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = kernel.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// True when the agent pinned itself to a platform.
    pub fn is_platform_specific(&self) -> bool {
        !self.os.is_empty()
            || !self.arch.is_empty()
            || !self.variant.is_empty()
            || !self.kernel.is_empty()
    }
}
