// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline definition structures
//!
//! Defines the schema for pipeline specification files and the fully
//! materialized model the rest of the engine consumes. Fragments exist only
//! in the raw document: by the time a [`Pipeline`] is handed out, every job
//! has its fragment fields merged in and no reference back to a fragment
//! survives.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::StagehandError;

/// A fully materialized pipeline
///
/// Stages run in declaration order; jobs within one stage may run
/// concurrently. The job map preserves declaration order, which is the
/// tie-break order under a saturated worker pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Stage names in execution order (unique)
    pub stages: Vec<String>,

    /// Global variables, lowest-precedence layer above the ambient environment
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,

    /// Jobs by name, in declaration order
    pub jobs: IndexMap<String, JobSpec>,
}

impl Pipeline {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, StagehandError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StagehandError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        Self::load(&content)
    }

    /// Parse and resolve a pipeline from YAML text
    ///
    /// Performs fragment merge resolution and structural validation. Loading
    /// a re-serialized pipeline yields an identical value.
    pub fn load(yaml: &str) -> Result<Self, StagehandError> {
        super::loader::load(yaml)
    }

    /// Serialize the materialized pipeline back to YAML
    pub fn to_yaml(&self) -> Result<String, StagehandError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a job by name
    pub fn get_job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name)
    }

    /// Jobs belonging to a stage, in declaration order
    pub fn jobs_in_stage(&self, stage: &str) -> Vec<&JobSpec> {
        self.jobs.values().filter(|j| j.stage == stage).collect()
    }

    /// Non-fatal findings about the pipeline structure
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for stage in &self.stages {
            if self.jobs_in_stage(stage).is_empty() {
                warnings.push(format!("Stage '{}' has no jobs", stage));
            }
        }

        warnings
    }
}

/// A single, fully resolved job
///
/// Merge semantics: when a job (or fragment) extends a fragment, scalar and
/// sequence fields replace wholesale, while `variables` and
/// `artifacts.reports` maps merge key-wise with the later layer winning per
/// key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    /// Job name (the key in the job map)
    #[serde(skip)]
    pub name: String,

    /// Stage this job belongs to; must appear in the pipeline's stage list
    pub stage: String,

    /// Execution-environment identifier, passed through to the environment
    /// provider (a container image name, for providers that use one)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Job variables, fragment-merged with local overrides applied
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,

    /// Commands run before the main command list
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<String>,

    /// Main command list; a non-zero exit aborts the rest of the job
    pub run: Vec<String>,

    /// Artifact retention policy and declared report paths
    #[serde(skip_serializing_if = "ArtifactPolicy::is_default")]
    pub artifacts: ArtifactPolicy,

    /// Regex applied to captured output; its first capture group is parsed
    /// as a coverage percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,

    /// Per-job timeout; exceeding it marks the job `TimedOut`
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::duration::serde_opt"
    )]
    pub timeout: Option<Duration>,
}

impl JobSpec {
    /// Setup and run commands in execution order
    pub fn commands(&self) -> impl Iterator<Item = &String> {
        self.setup.iter().chain(self.run.iter())
    }
}

/// Artifact retention policy for a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    /// When to collect the declared reports
    #[serde(rename = "when", default)]
    pub retention: Retention,

    /// Report kind → path (or glob) relative to the job workspace
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub reports: IndexMap<String, String>,
}

impl ArtifactPolicy {
    /// True when the policy is the default and declares nothing
    pub fn is_default(&self) -> bool {
        self.retention == Retention::default() && self.reports.is_empty()
    }
}

/// When declared artifacts are collected, relative to the job outcome
///
/// `Cancelled` and `TimedOut` jobs match neither `OnSuccess` nor `OnFailure`;
/// only `Always` collects from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Retention {
    /// Collect regardless of job outcome
    Always,
    /// Collect only when the job succeeded (default)
    #[default]
    OnSuccess,
    /// Collect only when the job failed
    OnFailure,
}

impl std::fmt::Display for Retention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::OnSuccess => write!(f, "on-success"),
            Self::OnFailure => write!(f, "on-failure"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw document schema (pre-resolution)
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level document as written by the user, before fragment resolution
#[derive(Debug, Deserialize)]
pub(crate) struct RawDocument {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub stages: Vec<String>,

    #[serde(default)]
    pub variables: IndexMap<String, String>,

    #[serde(default)]
    pub fragments: IndexMap<String, RawEntry>,

    #[serde(default)]
    pub jobs: IndexMap<String, RawEntry>,
}

fn default_name() -> String {
    "pipeline".to_string()
}

/// A job or fragment as declared, with its fragment references
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawEntry {
    #[serde(default, deserialize_with = "one_or_many")]
    pub extends: Vec<String>,

    #[serde(flatten)]
    pub fields: RawFields,
}

/// Declared job fields; `None` means "not declared here", which merge
/// resolution treats differently from an empty value
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawFields {
    pub stage: Option<String>,
    pub image: Option<String>,
    pub variables: Option<IndexMap<String, String>>,
    pub setup: Option<Vec<String>>,
    pub run: Option<Vec<String>>,
    pub artifacts: Option<RawArtifacts>,
    pub coverage: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawArtifacts {
    pub when: Option<Retention>,
    pub reports: Option<IndexMap<String, String>>,
}

/// Accept `extends: base` as well as `extends: [a, b]`
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
