// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Scheduler progress events
//!
//! The scheduler optionally reports progress over an unbounded channel so a
//! frontend can render live status without the engine knowing anything about
//! terminals.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::pipeline::job::JobStatus;
use crate::pipeline::scheduler::PipelineStatus;

/// Progress notification emitted during a run
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    PipelineStarted {
        pipeline: String,
        stages: usize,
        jobs: usize,
    },
    StageStarted {
        stage: String,
        jobs: usize,
    },
    JobStarted {
        stage: String,
        job: String,
    },
    JobFinished {
        stage: String,
        job: String,
        status: JobStatus,
        duration: Duration,
    },
    StageFinished {
        stage: String,
        status: PipelineStatus,
    },
    PipelineFinished {
        status: PipelineStatus,
        duration: Duration,
    },
}

/// Sender half handed to the scheduler
pub type EventSender = mpsc::UnboundedSender<SchedulerEvent>;

/// Best-effort emission; a closed or absent receiver is ignored
pub(crate) trait EventSink {
    fn emit(&self, event: SchedulerEvent);
}

impl EventSink for Option<EventSender> {
    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = self {
            let _ = tx.send(event);
        }
    }
}
