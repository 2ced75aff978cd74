// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Job execution
//!
//! Runs one job's ordered command list as a single session against an
//! execution environment: setup commands, then run commands, stopping at the
//! first non-zero exit. Supports cooperative cancellation and a per-job
//! deadline. The environment is torn down on every exit path; artifacts are
//! collected from the workspace before teardown.

use regex::Regex;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::artifacts::{self, CollectedArtifact, MissingArtifactWarning};
use crate::coverage;
use crate::errors::StagehandError;
use crate::executors::Executor;
use crate::pipeline::definition::JobSpec;
use crate::pipeline::resolver::EnvironmentMap;

/// Terminal status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Every command exited zero
    Success,
    /// A command exited non-zero, or the environment itself failed
    Failure,
    /// The job was aborted before or during execution
    Cancelled,
    /// The job exceeded its deadline
    TimedOut,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Final record of one job, created at start and never mutated once built
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Job name
    pub job: String,

    /// Stage the job belonged to
    pub stage: String,

    /// Terminal status
    pub status: JobStatus,

    /// True when a `Failure` came from the environment (setup, spawn,
    /// teardown) rather than from a command exiting non-zero
    pub infrastructure_failure: bool,

    /// Combined output of the commands that ran, in order
    pub captured_output: String,

    /// Collected report files
    pub artifacts: Vec<CollectedArtifact>,

    /// Declared reports that were not produced
    pub warnings: Vec<MissingArtifactWarning>,

    /// Coverage percentage extracted from the captured output
    pub coverage: Option<f64>,

    /// Wall-clock time from session creation to teardown
    #[serde(with = "crate::utils::duration::serde_secs")]
    pub duration: Duration,
}

impl JobResult {
    /// Result for a job that was cancelled before it started
    pub(crate) fn cancelled(spec: &JobSpec) -> Self {
        Self {
            job: spec.name.clone(),
            stage: spec.stage.clone(),
            status: JobStatus::Cancelled,
            infrastructure_failure: false,
            captured_output: String::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            coverage: None,
            duration: Duration::ZERO,
        }
    }

    /// Result for a job whose environment could not be created
    pub(crate) fn infrastructure(spec: &JobSpec, error: &StagehandError, duration: Duration) -> Self {
        Self {
            job: spec.name.clone(),
            stage: spec.stage.clone(),
            status: JobStatus::Failure,
            infrastructure_failure: true,
            captured_output: error.to_string(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            coverage: None,
            duration,
        }
    }
}

/// Execute one job to a terminal result
///
/// Never returns an error: every failure mode is folded into the result.
pub(crate) async fn run_job(
    spec: &JobSpec,
    env: &EnvironmentMap,
    executor: &dyn Executor,
    timeout: Option<Duration>,
    mut cancel: watch::Receiver<bool>,
) -> JobResult {
    let started = std::time::Instant::now();

    let mut session = match executor.create_session(spec).await {
        Ok(session) => session,
        Err(err) => {
            warn!(job = %spec.name, %err, "environment setup failed");
            return JobResult::infrastructure(spec, &err, started.elapsed());
        }
    };

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut output = String::new();
    let mut status = JobStatus::Success;
    let mut infrastructure = false;

    for command in spec.commands() {
        if *cancel.borrow() {
            status = JobStatus::Cancelled;
            break;
        }

        debug!(job = %spec.name, %command, "running command");

        let outcome = {
            let mut fut = session.run_command(command, env);

            match deadline {
                Some(deadline) => tokio::select! {
                    result = tokio::time::timeout_at(deadline, &mut fut) => Some(result),
                    _ = cancel.wait_for(|cancelled| *cancelled) => None,
                },
                None => tokio::select! {
                    result = &mut fut => Some(Ok(result)),
                    _ = cancel.wait_for(|cancelled| *cancelled) => None,
                },
            }
        };

        match outcome {
            None => {
                debug!(job = %spec.name, %command, "job cancelled");
                status = JobStatus::Cancelled;
                break;
            }
            Some(Err(_elapsed)) => {
                warn!(job = %spec.name, %command, "job deadline exceeded");
                status = JobStatus::TimedOut;
                break;
            }
            Some(Ok(Ok(command_outcome))) => {
                append_output(&mut output, &command_outcome.combined());

                if !command_outcome.success() {
                    debug!(
                        job = %spec.name,
                        %command,
                        exit_code = command_outcome.exit_code,
                        "command failed; aborting remaining commands"
                    );
                    status = JobStatus::Failure;
                    break;
                }
            }
            Some(Ok(Err(err))) => {
                warn!(job = %spec.name, %command, %err, "command could not be run");
                append_output(&mut output, &err.to_string());
                status = JobStatus::Failure;
                infrastructure = true;
                break;
            }
        }
    }

    let (collected, warnings) =
        artifacts::collect(&spec.artifacts, status, session.workspace());

    let coverage = spec
        .coverage
        .as_deref()
        .and_then(|pattern| Regex::new(pattern).ok())
        .and_then(|pattern| coverage::extract(&output, &pattern));

    if let Err(err) = session.teardown().await {
        warn!(job = %spec.name, %err, "environment teardown failed");
        if status == JobStatus::Success {
            status = JobStatus::Failure;
            infrastructure = true;
            append_output(&mut output, &err.to_string());
        }
    }

    JobResult {
        job: spec.name.clone(),
        stage: spec.stage.clone(),
        status,
        infrastructure_failure: infrastructure,
        captured_output: output,
        artifacts: collected,
        warnings,
        coverage,
        duration: started.elapsed(),
    }
}

fn append_output(buffer: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(text);
}
