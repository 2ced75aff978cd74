// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Run command - execute the pipeline

use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{exit_codes, status_glyph, OutputFormat};
use crate::config::EngineConfig;
use crate::errors::StagehandError;
use crate::executors::{Executor, LocalShellExecutor};
use crate::pipeline::{
    FailPolicy, Pipeline, PipelineResult, PipelineStatus, Scheduler, SchedulerEvent,
    SchedulerOptions,
};
use crate::utils::progress::create_job_bar;

/// Run the pipeline
#[allow(clippy::too_many_arguments)]
pub async fn run(
    spec_path: PathBuf,
    workers: Option<usize>,
    fail_policy: Option<FailPolicy>,
    timeout: Option<Duration>,
    job_timeout: Option<Duration>,
    format: OutputFormat,
    verbose: bool,
) -> Result<ExitCode, StagehandError> {
    if !spec_path.exists() {
        return Err(StagehandError::PipelineNotFound { path: spec_path });
    }

    let pipeline = Pipeline::from_file(&spec_path)?;
    let config = EngineConfig::load()?;

    let options = SchedulerOptions {
        workers: workers.unwrap_or(config.defaults.workers).max(1),
        fail_policy: fail_policy.unwrap_or(config.defaults.fail_policy),
        pipeline_timeout: timeout,
        job_timeout: job_timeout.or(config.job_timeout()?),
    };

    let executor = LocalShellExecutor::new(&config.defaults.shell)
        .with_root(PathBuf::from(".stagehand").join("runs"));
    executor.check_available().await?;
    let executor = Arc::new(executor);

    if verbose {
        for warning in pipeline.lint() {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
    }

    let result = match format {
        OutputFormat::Json => {
            let scheduler = Scheduler::new(executor, options);
            scheduler.run(&pipeline).await
        }
        OutputFormat::Text => {
            print_execution_plan(&pipeline, &options);

            let (tx, rx) = mpsc::unbounded_channel();
            let printer = tokio::spawn(print_events(rx, pipeline.jobs.len() as u64));

            // Scope the scheduler so its event sender drops and the printer
            // task sees the channel close.
            let result = {
                let scheduler = Scheduler::new(executor, options).with_events(tx);
                scheduler.run(&pipeline).await
            };

            let _ = printer.await;
            result
        }
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            print_summary(&result, verbose);
        }
    }

    Ok(match result.status {
        PipelineStatus::Success => ExitCode::from(exit_codes::SUCCESS),
        PipelineStatus::Failure => ExitCode::from(exit_codes::JOB_FAILURE),
        PipelineStatus::Cancelled | PipelineStatus::TimedOut => {
            ExitCode::from(exit_codes::INTERRUPTED)
        }
    })
}

/// Print the execution plan header
fn print_execution_plan(pipeline: &Pipeline, options: &SchedulerOptions) {
    println!();
    println!("{}: {}", "Pipeline".bold(), pipeline.name);
    println!("{}", "═".repeat(50));
    println!(
        "Execution plan ({} stage{}, {} workers):",
        pipeline.stages.len(),
        if pipeline.stages.len() == 1 { "" } else { "s" },
        options.workers
    );
    println!();

    for (i, stage) in pipeline.stages.iter().enumerate() {
        let jobs = pipeline.jobs_in_stage(stage);
        print!("  {}. {} ", i + 1, stage.bold());
        println!(
            "{}",
            format!(
                "[{}]",
                jobs.iter()
                    .map(|j| j.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
            .dimmed()
        );
    }

    println!();
}

/// Render scheduler events as they arrive
async fn print_events(mut rx: mpsc::UnboundedReceiver<SchedulerEvent>, total_jobs: u64) {
    let bar = create_job_bar(total_jobs, "Running");

    while let Some(event) = rx.recv().await {
        match event {
            SchedulerEvent::StageStarted { stage, jobs } => {
                bar.println(format!(
                    "  {} stage {} ({} job{})",
                    "→".blue(),
                    stage.bold(),
                    jobs,
                    if jobs == 1 { "" } else { "s" }
                ));
            }
            SchedulerEvent::JobFinished {
                job,
                status,
                duration,
                ..
            } => {
                bar.inc(1);
                bar.println(format!(
                    "    {} {} ({:.2}s)",
                    status_glyph(status),
                    job,
                    duration.as_secs_f64()
                ));
            }
            _ => {}
        }
    }

    bar.finish_and_clear();
}

/// Print the final summary
fn print_summary(result: &PipelineResult, verbose: bool) {
    println!();
    let seconds = result.duration.as_secs_f64();
    match result.status {
        PipelineStatus::Success => println!(
            "{}",
            format!("Pipeline completed successfully in {:.2}s", seconds).green()
        ),
        PipelineStatus::Failure => {
            println!("{}", format!("Pipeline failed after {:.2}s", seconds).red())
        }
        PipelineStatus::Cancelled => println!(
            "{}",
            format!("Pipeline cancelled after {:.2}s", seconds).yellow()
        ),
        PipelineStatus::TimedOut => println!(
            "{}",
            format!("Pipeline timed out after {:.2}s", seconds).red()
        ),
    }

    // Collected artifacts and missing-report warnings
    let artifacts: Vec<_> = result
        .job_results
        .values()
        .flat_map(|r| r.artifacts.iter())
        .collect();

    if !artifacts.is_empty() {
        println!();
        println!("{}:", "Artifacts".bold());
        for artifact in artifacts {
            println!(
                "  - [{}] {} ({} bytes)",
                artifact.kind,
                artifact.path.display(),
                artifact.size_bytes
            );
        }
    }

    for job in result.job_results.values() {
        for warning in &job.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if let Some(coverage) = result.coverage {
        println!();
        println!("{}: {:.1}%", "Coverage".bold(), coverage);
    }

    // Show what failed
    for job in result.job_results.values() {
        if job.status == crate::pipeline::JobStatus::Failure {
            println!();
            let kind = if job.infrastructure_failure {
                "infrastructure failure"
            } else {
                "failed"
            };
            println!("{}", format!("Job '{}' {}:", job.job, kind).red().bold());
            if !job.captured_output.is_empty() {
                println!("{}", job.captured_output.dimmed());
            }
        } else if verbose && !job.captured_output.is_empty() {
            println!();
            println!("{}", format!("Job '{}' output:", job.job).bold());
            println!("{}", job.captured_output.dimmed());
        }
    }
}
