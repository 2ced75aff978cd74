// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Scripted executor for scheduler and job tests
//!
//! Commands are interpreted, not run: `sleep:<ms>` waits, `exit:<code>` exits
//! with that code, anything else echoes itself with exit 0. Every command and
//! teardown is recorded with a timestamp so tests can assert ordering.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::errors::StagehandError;
use crate::executors::{CommandOutcome, Executor, Session};
use crate::pipeline::definition::JobSpec;
use crate::pipeline::resolver::EnvironmentMap;

#[derive(Debug, Clone)]
pub(crate) enum RecordKind {
    CommandStarted(String),
    CommandFinished(String),
    Teardown,
}

#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub job: String,
    pub kind: RecordKind,
    pub at: Instant,
}

#[derive(Default)]
pub(crate) struct Timeline {
    records: Mutex<Vec<Record>>,
}

impl Timeline {
    fn record(&self, job: &str, kind: RecordKind) {
        self.records.lock().unwrap().push(Record {
            job: job.to_string(),
            kind,
            at: Instant::now(),
        });
    }

    /// Commands started for a job, in order
    pub fn commands_for(&self, job: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job == job)
            .filter_map(|r| match &r.kind {
                RecordKind::CommandStarted(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn teardowns_for(&self, job: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job == job && matches!(r.kind, RecordKind::Teardown))
            .count()
    }

    /// When the job's first command started
    pub fn first_start(&self, job: &str) -> Option<Instant> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.job == job && matches!(r.kind, RecordKind::CommandStarted(_)))
            .map(|r| r.at)
    }

    /// When the job's last command finished
    pub fn last_finish(&self, job: &str) -> Option<Instant> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.job == job && matches!(r.kind, RecordKind::CommandFinished(_)))
            .map(|r| r.at)
    }

    /// Job names in the order their first command started
    pub fn start_order(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matches!(r.kind, RecordKind::CommandStarted(_)))
            .filter(|r| seen.insert(r.job.clone()))
            .map(|r| r.job.clone())
            .collect()
    }
}

pub(crate) struct MockExecutor {
    pub timeline: Arc<Timeline>,
    fail_setup: HashSet<String>,
    fail_teardown: HashSet<String>,
    workspace: PathBuf,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            timeline: Arc::new(Timeline::default()),
            fail_setup: HashSet::new(),
            fail_teardown: HashSet::new(),
            workspace: std::env::temp_dir(),
        }
    }

    pub fn fail_setup_for(mut self, job: &str) -> Self {
        self.fail_setup.insert(job.to_string());
        self
    }

    pub fn fail_teardown_for(mut self, job: &str) -> Self {
        self.fail_teardown.insert(job.to_string());
        self
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn create_session(&self, job: &JobSpec) -> Result<Box<dyn Session>, StagehandError> {
        if self.fail_setup.contains(&job.name) {
            return Err(StagehandError::EnvironmentSetup {
                job: job.name.clone(),
                error: "scripted setup failure".to_string(),
            });
        }

        Ok(Box::new(MockSession {
            job: job.name.clone(),
            timeline: self.timeline.clone(),
            fail_teardown: self.fail_teardown.contains(&job.name),
            workspace: self.workspace.clone(),
        }))
    }

    async fn check_available(&self) -> Result<(), StagehandError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSession {
    job: String,
    timeline: Arc<Timeline>,
    fail_teardown: bool,
    workspace: PathBuf,
}

#[async_trait]
impl Session for MockSession {
    async fn run_command(
        &mut self,
        command: &str,
        _env: &EnvironmentMap,
    ) -> Result<CommandOutcome, StagehandError> {
        self.timeline
            .record(&self.job, RecordKind::CommandStarted(command.to_string()));

        let mut exit_code = 0;
        let mut stdout = String::new();

        if let Some(ms) = command.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        } else if let Some(code) = command.strip_prefix("exit:") {
            exit_code = code.parse().unwrap_or(1);
        } else {
            stdout = command.to_string();
        }

        self.timeline
            .record(&self.job, RecordKind::CommandFinished(command.to_string()));

        Ok(CommandOutcome {
            exit_code,
            stdout,
            stderr: String::new(),
        })
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    async fn teardown(&mut self) -> Result<(), StagehandError> {
        self.timeline.record(&self.job, RecordKind::Teardown);

        if self.fail_teardown {
            return Err(StagehandError::EnvironmentTeardown {
                job: self.job.clone(),
                error: "scripted teardown failure".to_string(),
            });
        }

        Ok(())
    }
}
