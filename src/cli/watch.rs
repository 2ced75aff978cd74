// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Watch command - re-run the pipeline on file changes

use colored::Colorize;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use super::{exit_codes, status_glyph};
use crate::config::EngineConfig;
use crate::errors::StagehandError;
use crate::executors::LocalShellExecutor;
use crate::pipeline::{Pipeline, PipelineStatus, Scheduler, SchedulerOptions};

/// Run the watch command
pub async fn run(
    spec_path: PathBuf,
    debounce_ms: u64,
    verbose: bool,
) -> Result<ExitCode, StagehandError> {
    if !spec_path.exists() {
        return Err(StagehandError::PipelineNotFound { path: spec_path });
    }

    println!("{}", "Starting watch mode...".bold());
    println!("Watching for changes (debounce: {}ms)", debounce_ms);
    println!("Press {} to exit.", "Ctrl+C".cyan());
    println!();

    // Create channel for receiving events
    let (tx, rx) = channel();

    // Create debounced watcher
    let mut debouncer = new_debouncer(Duration::from_millis(debounce_ms), tx)
        .map_err(|e| StagehandError::Watch {
            message: e.to_string(),
        })?;

    // Watch current directory
    debouncer
        .watcher()
        .watch(Path::new("."), RecursiveMode::Recursive)
        .map_err(|e| StagehandError::Watch {
            message: e.to_string(),
        })?;

    // Initial run
    run_pipeline(&spec_path, verbose).await;

    // Watch for changes
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                // Skip the engine's own run directories
                let relevant: Vec<_> = events
                    .iter()
                    .filter(|e| !e.path.to_string_lossy().contains(".stagehand"))
                    .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                    .collect();

                if !relevant.is_empty() {
                    println!();
                    println!("{}", "─".repeat(50).dimmed());
                    println!(
                        "{}: {} file(s) changed",
                        "Change detected".yellow(),
                        relevant.len()
                    );

                    if verbose {
                        for event in &relevant {
                            println!("  {}", event.path.display());
                        }
                    }

                    println!();
                    run_pipeline(&spec_path, verbose).await;
                }
            }
            Ok(Err(e)) => {
                eprintln!("{}: {:?}", "Watch error".red(), e);
            }
            Err(e) => {
                // Channel closed
                eprintln!("{}: {}", "Channel error".red(), e);
                break;
            }
        }
    }

    Ok(ExitCode::from(exit_codes::SUCCESS))
}

async fn run_pipeline(spec_path: &Path, verbose: bool) {
    // Load pipeline
    let pipeline = match Pipeline::from_file(spec_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load pipeline".red(), e);
            return;
        }
    };

    let config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load configuration".red(), e);
            return;
        }
    };

    let job_timeout = match config.job_timeout() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: {}", "Failed to load configuration".red(), e);
            return;
        }
    };

    let options = SchedulerOptions {
        workers: config.defaults.workers.max(1),
        fail_policy: config.defaults.fail_policy,
        pipeline_timeout: None,
        job_timeout,
    };

    let executor = LocalShellExecutor::new(&config.defaults.shell)
        .with_root(PathBuf::from(".stagehand").join("runs"));

    let scheduler = Scheduler::new(Arc::new(executor), options);
    let result = scheduler.run(&pipeline).await;

    for job in result.job_results.values() {
        println!(
            "  {} {} ({:.2}s)",
            status_glyph(job.status),
            job.job,
            job.duration.as_secs_f64()
        );
        if verbose && !job.captured_output.is_empty() {
            println!("{}", job.captured_output.dimmed());
        }
    }

    println!();
    let seconds = result.duration.as_secs_f64();
    match result.status {
        PipelineStatus::Success => println!(
            "{} ({:.2}s)",
            "Pipeline completed successfully".green(),
            seconds
        ),
        PipelineStatus::Failure => {
            println!("{} ({:.2}s)", "Pipeline failed".red(), seconds)
        }
        PipelineStatus::Cancelled => {
            println!("{} ({:.2}s)", "Pipeline cancelled".yellow(), seconds)
        }
        PipelineStatus::TimedOut => {
            println!("{} ({:.2}s)", "Pipeline timed out".red(), seconds)
        }
    }
}
