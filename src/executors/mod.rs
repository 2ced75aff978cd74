// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Execution environments
//!
//! This module provides the executor trait hierarchy: an [`Executor`] creates
//! one isolated [`Session`] per job, and a session runs that job's commands
//! sequentially until torn down. Each session is owned exclusively by one job
//! for its lifetime; no job can observe another's filesystem or process
//! state.

mod shell;

pub use shell::LocalShellExecutor;

use async_trait::async_trait;
use std::path::Path;

use crate::errors::StagehandError;
use crate::pipeline::definition::JobSpec;
use crate::pipeline::resolver::EnvironmentMap;

/// Outcome of one command inside a session
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Exit code (non-zero aborts the rest of the job)
    pub exit_code: i32,

    /// Captured standard output
    pub stdout: String,

    /// Captured standard error
    pub stderr: String,
}

impl CommandOutcome {
    /// Whether the command exited cleanly
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output text in stream order per command
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Provider of isolated execution environments
#[async_trait]
pub trait Executor: Send + Sync {
    /// Create a fresh session for one job
    ///
    /// The session is scoped to the job: created before its first command and
    /// torn down after its last, on every exit path.
    async fn create_session(&self, job: &JobSpec) -> Result<Box<dyn Session>, StagehandError>;

    /// Check that the environment substrate is usable
    async fn check_available(&self) -> Result<(), StagehandError>;

    /// Provider name for diagnostics
    fn name(&self) -> &str;
}

/// One job's live execution environment
#[async_trait]
pub trait Session: Send {
    /// Run a single command to completion, capturing its output
    ///
    /// An `Err` means the environment failed to run the command at all
    /// (infrastructure), as opposed to the command running and exiting
    /// non-zero.
    async fn run_command(
        &mut self,
        command: &str,
        env: &EnvironmentMap,
    ) -> Result<CommandOutcome, StagehandError>;

    /// The workspace directory commands run in; artifacts are collected from
    /// here before teardown
    fn workspace(&self) -> &Path;

    /// Release the environment; must be called on every exit path
    async fn teardown(&mut self) -> Result<(), StagehandError>;
}
