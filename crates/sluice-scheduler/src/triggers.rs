//! Trigger condition evaluation.
//!
//! A document runs only if every condition of its trigger block matches the
//! hook. Conditions are include/exclude glob lists; an empty condition always
//! matches.

use glob::{MatchOptions, Pattern};
use sluice_core::hook::Hook;
use sluice_core::pipeline::{Condition, Document, Repository};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Commit message markers that suppress a trigger entirely.
const SKIP_DIRECTIVES: [&str; 3] = ["[ci skip]", "[skip ci]", "***no_ci***"];

/// Why a document was not matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Branch,
    Event,
    Action,
    Ref,
    Repo,
    Cron,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Branch => "branch",
            SkipReason::Event => "event",
            SkipReason::Action => "action",
            SkipReason::Ref => "ref",
            SkipReason::Repo => "repo",
            SkipReason::Cron => "cron",
        }
    }
}

/// Matcher for determining if a document should run for a hook.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate branch, event, action, ref, repo, and cron in that order.
    /// Returns the first condition that rejects the hook.
    pub fn skip_reason(&self, doc: &Document, hook: &Hook, repo: &Repository) -> Option<SkipReason> {
        let trigger = &doc.trigger;
        let checks = [
            (&trigger.branch, hook.target.as_str(), SkipReason::Branch),
            (&trigger.event, hook.event.as_str(), SkipReason::Event),
            (&trigger.action, hook.action.as_str(), SkipReason::Action),
            (&trigger.git_ref, hook.git_ref.as_str(), SkipReason::Ref),
            (&trigger.repo, repo.path.as_str(), SkipReason::Repo),
            (&trigger.cron, hook.cron.as_str(), SkipReason::Cron),
        ];

        checks
            .into_iter()
            .find(|(condition, value, _)| !self.condition_matches(condition, value))
            .map(|(_, _, reason)| reason)
    }

    /// True if the hook's title or message asks for the trigger to be ignored.
    pub fn has_skip_directive(&self, hook: &Hook) -> bool {
        let title = hook.title.to_lowercase();
        let message = hook.message.to_lowercase();
        SKIP_DIRECTIVES
            .iter()
            .any(|d| title.contains(d) || message.contains(d))
    }

    /// Exclusions win over inclusions; with no inclusions anything not
    /// excluded matches.
    pub fn condition_matches(&self, condition: &Condition, value: &str) -> bool {
        if condition.exclude.iter().any(|p| self.glob_match(p, value)) {
            return false;
        }
        if condition.include.is_empty() {
            return true;
        }
        condition.include.iter().any(|p| self.glob_match(p, value))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        match Pattern::new(pattern) {
            Ok(pattern) => pattern.matches_with(text, MATCH_OPTIONS),
            Err(_) => pattern == text,
        }
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::pipeline::Conditions;

    fn hook(target: &str, event: &str) -> Hook {
        Hook {
            target: target.into(),
            event: event.into(),
            git_ref: format!("refs/heads/{target}"),
            ..Default::default()
        }
    }

    fn repo() -> Repository {
        Repository {
            path: "acme/widgets".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_condition_exact_and_glob() {
        let matcher = TriggerMatcher::new();
        let cond = Condition::include(&["main", "feature/*"]);
        assert!(matcher.condition_matches(&cond, "main"));
        assert!(matcher.condition_matches(&cond, "feature/foo"));
        assert!(!matcher.condition_matches(&cond, "feature/foo/bar"));
        assert!(!matcher.condition_matches(&cond, "develop"));
    }

    #[test]
    fn test_exclude_wins() {
        let matcher = TriggerMatcher::new();
        let cond = Condition {
            include: vec!["release/*".into()],
            exclude: vec!["release/old".into()],
        };
        assert!(matcher.condition_matches(&cond, "release/v2"));
        assert!(!matcher.condition_matches(&cond, "release/old"));
        assert!(!matcher.condition_matches(&Condition::exclude(&["main"]), "main"));
        assert!(matcher.condition_matches(&Condition::exclude(&["main"]), "dev"));
    }

    #[test]
    fn test_empty_condition_matches_all() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.condition_matches(&Condition::default(), "any-branch"));
        assert!(matcher.condition_matches(&Condition::default(), ""));
    }

    #[test]
    fn test_first_failing_condition_is_reported() {
        let matcher = TriggerMatcher::new();
        let doc = Document {
            trigger: Conditions {
                branch: Condition::include(&["main"]),
                event: Condition::include(&["tag"]),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(
            matcher.skip_reason(&doc, &hook("dev", "push"), &repo()),
            Some(SkipReason::Branch)
        );
        assert_eq!(
            matcher.skip_reason(&doc, &hook("main", "push"), &repo()),
            Some(SkipReason::Event)
        );
        assert_eq!(matcher.skip_reason(&doc, &hook("main", "tag"), &repo()), None);
    }

    #[test]
    fn test_repo_and_cron_conditions() {
        let matcher = TriggerMatcher::new();
        let doc = Document {
            trigger: Conditions {
                repo: Condition::include(&["acme/*"]),
                cron: Condition::include(&["nightly"]),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut h = hook("main", "cron");
        assert_eq!(matcher.skip_reason(&doc, &h, &repo()), Some(SkipReason::Cron));
        h.cron = "nightly".into();
        assert_eq!(matcher.skip_reason(&doc, &h, &repo()), None);

        let other = Repository {
            path: "other/widgets".into(),
            ..Default::default()
        };
        assert_eq!(matcher.skip_reason(&doc, &h, &other), Some(SkipReason::Repo));
    }

    #[test]
    fn test_skip_directive() {
        let matcher = TriggerMatcher::new();
        let mut h = hook("main", "push");
        assert!(!matcher.has_skip_directive(&h));
        h.message = "fix typo [CI SKIP]".into();
        assert!(matcher.has_skip_directive(&h));
        h.message = String::new();
        h.title = "wip ***NO_CI***".into();
        assert!(matcher.has_skip_directive(&h));
    }
}
