//! Fixtures for repositories, pipelines, hooks, and pipeline documents.

use serde::Deserialize;
use sluice_core::RepoId;
use sluice_core::hook::{Hook, TRIGGER_HOOK};
use sluice_core::pipeline::{Document, DocumentStep, Manifest, Pipeline, Repository};

/// Factory for test repositories.
pub struct RepoFixture;

impl RepoFixture {
    pub fn acme() -> Repository {
        Repository {
            id: RepoId::new(1),
            path: "acme/widgets".to_string(),
            throttle: 0,
        }
    }

    pub fn throttled(limit: u32) -> Repository {
        Repository {
            throttle: limit,
            ..Self::acme()
        }
    }
}

/// Factory for test pipelines. Ids are assigned by the store.
pub struct PipelineFixture;

impl PipelineFixture {
    pub fn for_repo(repo: &Repository) -> Pipeline {
        Pipeline {
            repo_id: repo.id,
            uid: "default".to_string(),
            config_path: ".sluice.yml".to_string(),
            ..Default::default()
        }
    }
}

/// Factory for trigger hooks.
pub struct HookFixture;

impl HookFixture {
    /// A push to `branch`.
    pub fn push(branch: &str) -> Hook {
        Hook {
            trigger: TRIGGER_HOOK.to_string(),
            triggered_by: "octocat".to_string(),
            event: "push".to_string(),
            git_ref: format!("refs/heads/{}", branch),
            source: branch.to_string(),
            target: branch.to_string(),
            before: "9f2c3a1".to_string(),
            after: "4be7d0e".to_string(),
            title: "Update README".to_string(),
            message: "Update README\n\nFix install instructions.".to_string(),
            author_login: "octocat".to_string(),
            author_name: "The Octocat".to_string(),
            author_email: "octocat@example.com".to_string(),
            sender: "octocat".to_string(),
            ..Default::default()
        }
    }

    pub fn with_message(mut hook: Hook, message: &str) -> Hook {
        hook.message = message.to_string();
        hook
    }
}

/// Factory for pipeline documents.
pub struct DocumentFixture;

impl DocumentFixture {
    /// A document with a single step and no dependencies.
    pub fn named(name: &str) -> Document {
        Document {
            name: name.to_string(),
            kind: "pipeline".to_string(),
            steps: vec![DocumentStep {
                name: "run".to_string(),
                image: "alpine:3".to_string(),
                commands: vec!["make".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    pub fn depends(name: &str, depends_on: &[&str]) -> Document {
        Document {
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            ..Self::named(name)
        }
    }
}

/// Parse a multi-document YAML pipeline configuration.
pub fn manifest_from_yaml(yaml: &str) -> anyhow::Result<Manifest> {
    let mut documents = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(yaml) {
        documents.push(Document::deserialize(doc)?);
    }
    Ok(Manifest { documents })
}

pub fn manifest(documents: Vec<Document>) -> Manifest {
    Manifest { documents }
}

/// build -> test -> deploy
pub const LINEAR_YAML: &str = r#"
kind: pipeline
type: docker
name: build
steps:
  - name: compile
    image: rust:1
    commands: [cargo build]
---
kind: pipeline
type: docker
name: test
depends_on: [build]
steps:
  - name: unit
    image: rust:1
    commands: [cargo test]
---
kind: pipeline
type: docker
name: deploy
depends_on: [test]
trigger:
  branch: main
steps:
  - name: publish
    image: alpine:3
"#;
