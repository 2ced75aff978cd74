// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Error types
//!
//! Configuration errors are fatal and reported before any job runs. Everything
//! that happens inside a running job (non-zero exits, missing artifacts,
//! cancellation) is captured in that job's result instead of surfacing here.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stagehand operations
pub type StagehandResult<T> = Result<T, StagehandError>;

/// Main error type for stagehand
#[derive(Error, Debug, Diagnostic)]
pub enum StagehandError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(stagehand::pipeline_not_found),
        help("Create a pipeline file or pass its path explicitly: stagehand run <spec>")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(stagehand::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("'{name}' is defined more than once")]
    #[diagnostic(
        code(stagehand::duplicate_definition),
        help("A name may be declared either under 'fragments:' or as a hidden '.{name}' job, not both")
    )]
    DuplicateDefinition { name: String },

    #[error("Duplicate stage '{stage}' in stage list")]
    #[diagnostic(code(stagehand::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("Job '{job}' references unknown stage '{stage}'")]
    #[diagnostic(
        code(stagehand::unknown_stage),
        help("Add '{stage}' to the top-level 'stages:' list or fix the job's 'stage:' field")
    )]
    UnknownStage { job: String, stage: String },

    #[error("'{referrer}' extends unknown fragment '{fragment}'")]
    #[diagnostic(
        code(stagehand::unknown_fragment),
        help("Declare the fragment under 'fragments:' or as a hidden '.{fragment}' job")
    )]
    UnknownFragment { referrer: String, fragment: String },

    #[error("Cyclic fragment reference: {}", cycle.join(" -> "))]
    #[diagnostic(
        code(stagehand::cyclic_fragment_reference),
        help("Review the 'extends' chains to remove the cycle")
    )]
    CyclicFragmentReference { cycle: Vec<String> },

    #[error("Job '{job}' is invalid: {reason}")]
    #[diagnostic(code(stagehand::invalid_job))]
    InvalidJob { job: String, reason: String },

    #[error("Job '{job}' has an invalid coverage pattern '{pattern}': {error}")]
    #[diagnostic(
        code(stagehand::invalid_coverage_pattern),
        help("The pattern is a regular expression; its first capture group must match a percentage")
    )]
    InvalidCoveragePattern {
        job: String,
        pattern: String,
        error: String,
    },

    #[error("Job '{job}' declares an invalid artifact path '{pattern}': {error}")]
    #[diagnostic(code(stagehand::invalid_artifact_pattern))]
    InvalidArtifactPattern {
        job: String,
        pattern: String,
        error: String,
    },

    #[error("Invalid duration '{value}'")]
    #[diagnostic(
        code(stagehand::invalid_duration),
        help("Use a number of seconds or a suffixed value like '90s', '5m', '1h'")
    )]
    InvalidDuration { value: String },

    #[error("Invalid engine configuration in '{path}': {error}")]
    #[diagnostic(code(stagehand::invalid_config))]
    InvalidConfig { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Shell '{shell}' not found")]
    #[diagnostic(
        code(stagehand::shell_not_found),
        help("Install '{shell}' or set a different shell in stagehand.toml")
    )]
    ShellNotFound { shell: String },

    #[error("Failed to set up execution environment for job '{job}': {error}")]
    #[diagnostic(code(stagehand::environment_setup))]
    EnvironmentSetup { job: String, error: String },

    #[error("Failed to tear down execution environment for job '{job}': {error}")]
    #[diagnostic(code(stagehand::environment_teardown))]
    EnvironmentTeardown { job: String, error: String },

    #[error("Command could not be spawned: {error}")]
    #[diagnostic(code(stagehand::command_spawn))]
    CommandSpawn { error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/Format Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(stagehand::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(stagehand::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(stagehand::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(stagehand::json_error))]
    Json { message: String },

    #[error("Watch error: {message}")]
    #[diagnostic(code(stagehand::watch_error))]
    Watch { message: String },
}

impl From<std::io::Error> for StagehandError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for StagehandError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for StagehandError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl StagehandError {
    /// Create an invalid-pipeline error without a help text
    pub fn invalid_pipeline(reason: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            reason: reason.into(),
            help: None,
        }
    }
}
