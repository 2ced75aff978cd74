// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Stage scheduling
//!
//! Drives a pipeline stage by stage: all jobs of a stage are dispatched
//! concurrently, bounded by the worker pool, and the next stage starts only
//! once every job in the current one has reached a terminal result. Under
//! fail-fast, the first failing job trips a cancellation signal that stops
//! in-flight siblings and marks everything not yet started as cancelled.
//! Those jobs still appear in the result, never silently dropped.

use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::coverage;
use crate::errors::StagehandError;
use crate::executors::Executor;
use crate::pipeline::definition::{JobSpec, Pipeline};
use crate::pipeline::events::{EventSender, EventSink, SchedulerEvent};
use crate::pipeline::job::{self, JobResult, JobStatus};
use crate::pipeline::resolver::{self, EnvironmentMap};

/// What to do when a job fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub enum FailPolicy {
    /// Cancel remaining work on the first failure (strict build gate)
    #[default]
    #[serde(rename = "fast")]
    FailFast,

    /// Keep running later stages; the pipeline still reports failure
    #[serde(rename = "continue")]
    ContinueOnFailure,
}

impl std::str::FromStr for FailPolicy {
    type Err = StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::FailFast),
            "continue" => Ok(Self::ContinueOnFailure),
            _ => Err(StagehandError::invalid_pipeline(format!(
                "unknown fail policy '{}' (expected 'fast' or 'continue')",
                s
            ))),
        }
    }
}

/// Terminal status of a stage or of the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStatus {
    Success,
    Failure,
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Worker pool size; 1 means fully sequential execution
    pub workers: usize,

    /// Failure policy
    pub fail_policy: FailPolicy,

    /// Bound on the whole run; expiry cancels all outstanding jobs
    pub pipeline_timeout: Option<Duration>,

    /// Default per-job timeout for jobs that declare none
    pub job_timeout: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            fail_policy: FailPolicy::default(),
            pipeline_timeout: None,
            job_timeout: None,
        }
    }
}

/// Aggregate result for one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name
    pub stage: String,

    /// Aggregate status over the stage's jobs
    pub status: PipelineStatus,

    /// Names of the jobs that ran (or were cancelled) in this stage
    pub jobs: Vec<String>,
}

/// Final record of a pipeline run
///
/// Sealed when the last stage completes or the run aborts; every declared job
/// appears in `job_results`, including jobs cancelled before starting.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline: String,

    /// Overall status
    pub status: PipelineStatus,

    /// Per-stage aggregate results, in stage order
    pub stage_results: Vec<StageResult>,

    /// Per-job results, in declaration order
    pub job_results: IndexMap<String, JobResult>,

    /// Aggregated coverage over jobs that produced a value
    pub coverage: Option<f64>,

    /// Total wall-clock time
    #[serde(with = "crate::utils::duration::serde_secs")]
    pub duration: Duration,
}

impl PipelineResult {
    /// Whether every job succeeded
    pub fn success(&self) -> bool {
        self.status == PipelineStatus::Success
    }
}

/// Drives pipeline execution against an executor
pub struct Scheduler {
    executor: Arc<dyn Executor>,
    options: SchedulerOptions,
    ambient: EnvironmentMap,
    events: Option<EventSender>,
}

impl Scheduler {
    /// Create a scheduler; the ambient environment is snapshotted here
    pub fn new(executor: Arc<dyn Executor>, options: SchedulerOptions) -> Self {
        Self {
            executor,
            options,
            ambient: resolver::ambient_env(),
            events: None,
        }
    }

    /// Replace the ambient environment layer (tests use an empty one)
    pub fn with_ambient(mut self, ambient: EnvironmentMap) -> Self {
        self.ambient = ambient;
        self
    }

    /// Report progress events to the given channel
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Run the pipeline to completion
    ///
    /// Never returns an error: per-job failures are folded into the result
    /// and configuration problems are caught at load time.
    pub async fn run(&self, pipeline: &Pipeline) -> PipelineResult {
        let started = Instant::now();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let pipeline_timed_out = Arc::new(AtomicBool::new(false));

        let timer = self.options.pipeline_timeout.map(|limit| {
            let cancel_tx = cancel_tx.clone();
            let flag = pipeline_timed_out.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("pipeline timeout reached; cancelling outstanding jobs");
                flag.store(true, Ordering::SeqCst);
                let _ = cancel_tx.send(true);
            })
        });

        self.events.emit(SchedulerEvent::PipelineStarted {
            pipeline: pipeline.name.clone(),
            stages: pipeline.stages.len(),
            jobs: pipeline.jobs.len(),
        });

        debug!(
            pipeline = %pipeline.name,
            stages = pipeline.stages.len(),
            jobs = pipeline.jobs.len(),
            workers = self.options.workers,
            "starting pipeline"
        );

        let mut stage_results = Vec::with_capacity(pipeline.stages.len());
        let mut job_results: IndexMap<String, JobResult> = IndexMap::new();

        for stage in &pipeline.stages {
            let jobs = pipeline.jobs_in_stage(stage);

            self.events.emit(SchedulerEvent::StageStarted {
                stage: stage.clone(),
                jobs: jobs.len(),
            });
            debug!(%stage, jobs = jobs.len(), "entering stage");

            let results = if *cancel_rx.borrow() {
                // A previous stage tripped fail-fast or the run timed out;
                // these jobs still get a terminal record.
                jobs.iter()
                    .map(|job| {
                        let result = JobResult::cancelled(job);
                        self.events.emit(SchedulerEvent::JobFinished {
                            stage: stage.clone(),
                            job: result.job.clone(),
                            status: result.status,
                            duration: result.duration,
                        });
                        result
                    })
                    .collect()
            } else {
                self.run_stage(pipeline, stage, &jobs, &cancel_tx, &cancel_rx)
                    .await
            };

            let status = aggregate_status(&results);
            debug!(%stage, %status, "stage complete");

            self.events.emit(SchedulerEvent::StageFinished {
                stage: stage.clone(),
                status,
            });

            stage_results.push(StageResult {
                stage: stage.clone(),
                status,
                jobs: results.iter().map(|r| r.job.clone()).collect(),
            });

            for result in results {
                job_results.insert(result.job.clone(), result);
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let status = overall_status(
            job_results.values(),
            pipeline_timed_out.load(Ordering::SeqCst),
        );
        let coverage = coverage::aggregate(job_results.values().filter_map(|r| r.coverage));
        let duration = started.elapsed();

        self.events.emit(SchedulerEvent::PipelineFinished { status, duration });
        debug!(pipeline = %pipeline.name, %status, ?duration, "pipeline finished");

        PipelineResult {
            pipeline: pipeline.name.clone(),
            status,
            stage_results,
            job_results,
            coverage,
            duration,
        }
    }

    /// Dispatch one stage's jobs and wait for all of them to reach a
    /// terminal result (the stage barrier)
    async fn run_stage(
        &self,
        pipeline: &Pipeline,
        stage: &str,
        jobs: &[&JobSpec],
        cancel_tx: &Arc<watch::Sender<bool>>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Vec<JobResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let fail_fast = self.options.fail_policy == FailPolicy::FailFast;

        // Spawn in declaration order; the semaphore queue is fair, so jobs
        // are admitted in that same order when the pool is saturated.
        let mut handles = Vec::with_capacity(jobs.len());
        for job_spec in jobs {
            let spec = (*job_spec).clone();
            let env = resolver::effective_env(pipeline, job_spec, &self.ambient);
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let mut cancel = cancel_rx.clone();
            let cancel_tx = cancel_tx.clone();
            let events = self.events.clone();
            let timeout = spec.timeout.or(self.options.job_timeout);
            let stage = stage.to_string();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.wait_for(|cancelled| *cancelled) => None,
                };

                let Some(_permit) = permit else {
                    return JobResult::cancelled(&spec);
                };
                if *cancel.borrow() {
                    return JobResult::cancelled(&spec);
                }

                events.emit(SchedulerEvent::JobStarted {
                    stage: stage.clone(),
                    job: spec.name.clone(),
                });

                let result =
                    job::run_job(&spec, &env, executor.as_ref(), timeout, cancel).await;

                // A cancelled job must never re-trip the signal; timed-out
                // jobs gate like failures while keeping their own status.
                if fail_fast
                    && matches!(result.status, JobStatus::Failure | JobStatus::TimedOut)
                {
                    let _ = cancel_tx.send(true);
                }

                events.emit(SchedulerEvent::JobFinished {
                    stage,
                    job: spec.name.clone(),
                    status: result.status,
                    duration: result.duration,
                });

                result
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (handle, job_spec) in handles.into_iter().zip(jobs) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(job = %job_spec.name, %err, "job task aborted unexpectedly");
                    let error = StagehandError::EnvironmentSetup {
                        job: job_spec.name.clone(),
                        error: err.to_string(),
                    };
                    results.push(JobResult::infrastructure(job_spec, &error, Duration::ZERO));
                }
            }
        }

        results
    }
}

fn aggregate_status(results: &[JobResult]) -> PipelineStatus {
    if results.iter().any(|r| r.status == JobStatus::Failure) {
        PipelineStatus::Failure
    } else if results.iter().any(|r| r.status == JobStatus::TimedOut) {
        PipelineStatus::TimedOut
    } else if results.iter().any(|r| r.status == JobStatus::Cancelled) {
        PipelineStatus::Cancelled
    } else {
        PipelineStatus::Success
    }
}

fn overall_status<'a>(
    results: impl Iterator<Item = &'a JobResult>,
    pipeline_timed_out: bool,
) -> PipelineStatus {
    let mut any_timed_out = false;
    let mut any_cancelled = false;

    for result in results {
        match result.status {
            JobStatus::Failure => return PipelineStatus::Failure,
            JobStatus::TimedOut => any_timed_out = true,
            JobStatus::Cancelled => any_cancelled = true,
            JobStatus::Success => {}
        }
    }

    if pipeline_timed_out || any_timed_out {
        PipelineStatus::TimedOut
    } else if any_cancelled {
        PipelineStatus::Cancelled
    } else {
        PipelineStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::MockExecutor;
    use tokio::sync::mpsc;

    fn scheduler(executor: Arc<MockExecutor>, options: SchedulerOptions) -> Scheduler {
        Scheduler::new(executor, options).with_ambient(EnvironmentMap::new())
    }

    #[tokio::test]
    async fn test_all_jobs_succeed() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, test]
jobs:
  compile:
    stage: build
    run: [compiling]
  unit:
    stage: test
    run: [testing]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Success);
        assert!(result.success());
        assert_eq!(result.job_results.len(), 2);
        assert_eq!(result.stage_results.len(), 2);
        assert!(result
            .stage_results
            .iter()
            .all(|s| s.status == PipelineStatus::Success));
    }

    #[tokio::test]
    async fn test_stage_barrier_orders_execution() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, test]
jobs:
  slow-a:
    stage: build
    run: ["sleep:60"]
  slow-b:
    stage: build
    run: ["sleep:100"]
  checker:
    stage: test
    run: ["sleep:10"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Success);

        let timeline = &executor.timeline;
        let build_done = timeline
            .last_finish("slow-a")
            .unwrap()
            .max(timeline.last_finish("slow-b").unwrap());
        let test_started = timeline.first_start("checker").unwrap();

        assert!(
            test_started >= build_done,
            "stage barrier violated: test job started before build jobs finished"
        );
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_later_stages() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, check]
jobs:
  build-job:
    stage: build
    run: ["exit:2"]
  check-job:
    stage: check
    run: ["never"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Failure);
        assert_eq!(
            result.job_results["build-job"].status,
            JobStatus::Failure
        );
        assert_eq!(
            result.job_results["check-job"].status,
            JobStatus::Cancelled
        );
        assert!(executor.timeline.commands_for("check-job").is_empty());

        assert_eq!(result.stage_results[0].status, PipelineStatus::Failure);
        assert_eq!(result.stage_results[1].status, PipelineStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_in_flight_siblings() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build]
jobs:
  failer:
    stage: build
    run: ["exit:1"]
  slowpoke:
    stage: build
    run: ["sleep:5000"]
"#,
        )
        .unwrap();

        let started = Instant::now();
        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Failure);
        assert_eq!(result.job_results["slowpoke"].status, JobStatus::Cancelled);
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "in-flight job was not cancelled promptly"
        );
    }

    #[tokio::test]
    async fn test_continue_on_failure_runs_later_stages() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, check]
jobs:
  build-job:
    stage: build
    run: ["exit:1"]
  check-job:
    stage: check
    run: ["checking"]
"#,
        )
        .unwrap();

        let options = SchedulerOptions {
            fail_policy: FailPolicy::ContinueOnFailure,
            ..Default::default()
        };
        let result = scheduler(executor.clone(), options).run(&pipeline).await;

        assert_eq!(result.status, PipelineStatus::Failure);
        assert_eq!(result.job_results["check-job"].status, JobStatus::Success);
        assert_eq!(
            executor.timeline.commands_for("check-job"),
            vec!["checking"]
        );
    }

    #[tokio::test]
    async fn test_saturated_pool_admits_in_declaration_order() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build]
jobs:
  first:
    stage: build
    run: ["sleep:20"]
  second:
    stage: build
    run: ["sleep:20"]
  third:
    stage: build
    run: ["sleep:20"]
"#,
        )
        .unwrap();

        let options = SchedulerOptions {
            workers: 1,
            ..Default::default()
        };
        let result = scheduler(executor.clone(), options).run(&pipeline).await;

        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(
            executor.timeline.start_order(),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn test_pipeline_timeout_cancels_outstanding_jobs() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, deploy]
jobs:
  stuck:
    stage: build
    run: ["sleep:10000"]
  ship:
    stage: deploy
    run: ["never"]
"#,
        )
        .unwrap();

        let options = SchedulerOptions {
            pipeline_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };

        let started = Instant::now();
        let result = scheduler(executor.clone(), options).run(&pipeline).await;

        assert_eq!(result.status, PipelineStatus::TimedOut);
        assert_eq!(result.job_results["stuck"].status, JobStatus::Cancelled);
        assert_eq!(result.job_results["ship"].status, JobStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_per_job_timeout_gates_like_failure() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build, deploy]
jobs:
  stuck:
    stage: build
    run: ["sleep:10000"]
    timeout: 100ms
  ship:
    stage: deploy
    run: ["never"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::TimedOut);
        assert_eq!(result.job_results["stuck"].status, JobStatus::TimedOut);
        assert_eq!(result.job_results["ship"].status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_every_job_appears_in_result() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [a, b, c]
jobs:
  one:
    stage: a
    run: ["exit:1"]
  two:
    stage: b
    run: ["x"]
  three:
    stage: c
    run: ["y"]
  four:
    stage: c
    run: ["z"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.job_results.len(), 4);
        for name in ["one", "two", "three", "four"] {
            assert!(result.job_results.contains_key(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_coverage_is_aggregated() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [test]
jobs:
  unit:
    stage: test
    run: ["TOTAL 80.0%"]
    coverage: 'TOTAL ([0-9.]+)%'
  integration:
    stage: test
    run: ["TOTAL 90.0%"]
    coverage: 'TOTAL ([0-9.]+)%'
  lint:
    stage: test
    run: ["no coverage output"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.coverage, Some(85.0));
        assert_eq!(result.job_results["lint"].coverage, None);
    }

    #[tokio::test]
    async fn test_infrastructure_failure_is_flagged() {
        let executor = Arc::new(MockExecutor::new().fail_setup_for("broken"));
        let pipeline = Pipeline::load(
            r#"
stages: [build]
jobs:
  broken:
    stage: build
    run: ["x"]
"#,
        )
        .unwrap();

        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Failure);
        let job = &result.job_results["broken"];
        assert_eq!(job.status, JobStatus::Failure);
        assert!(job.infrastructure_failure);
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let executor = Arc::new(MockExecutor::new());
        let pipeline = Pipeline::load(
            r#"
stages: [build]
jobs:
  only:
    stage: build
    run: ["x"]
"#,
        )
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = scheduler(executor.clone(), SchedulerOptions::default())
            .with_events(tx)
            .run(&pipeline)
            .await;

        assert_eq!(result.status, PipelineStatus::Success);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(events[0], SchedulerEvent::PipelineStarted { .. }));
        assert!(matches!(
            events.last().unwrap(),
            SchedulerEvent::PipelineFinished {
                status: PipelineStatus::Success,
                ..
            }
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::JobFinished { status: JobStatus::Success, .. })));
    }

    #[test]
    fn test_fail_policy_parses() {
        assert_eq!("fast".parse::<FailPolicy>().unwrap(), FailPolicy::FailFast);
        assert_eq!(
            "continue".parse::<FailPolicy>().unwrap(),
            FailPolicy::ContinueOnFailure
        );
        assert!("sometimes".parse::<FailPolicy>().is_err());
    }
}
