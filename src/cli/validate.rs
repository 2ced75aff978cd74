// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Validate command - check the pipeline specification

use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use super::exit_codes;
use crate::errors::StagehandError;
use crate::pipeline::Pipeline;

/// Run the validate command
pub async fn run(spec_path: PathBuf, verbose: bool) -> Result<ExitCode, StagehandError> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    if !spec_path.exists() {
        return Err(StagehandError::PipelineNotFound { path: spec_path });
    }

    // Parse, resolve fragments, and validate in one pass; any error here is
    // a configuration error reported before a single job would run.
    let pipeline = Pipeline::from_file(&spec_path)?;

    println!(
        "  {} Specification parsed and fragments resolved",
        "✓".green()
    );
    println!(
        "  {} {} stage{}, {} job{}",
        "✓".green(),
        pipeline.stages.len(),
        if pipeline.stages.len() == 1 { "" } else { "s" },
        pipeline.jobs.len(),
        if pipeline.jobs.len() == 1 { "" } else { "s" },
    );

    let warnings = pipeline.lint();
    if !warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        for stage in &pipeline.stages {
            println!("  Stage {}:", stage.bold());
            for job in pipeline.jobs_in_stage(stage) {
                let mut notes = Vec::new();
                if let Some(image) = &job.image {
                    notes.push(format!("image: {}", image));
                }
                if !job.artifacts.reports.is_empty() {
                    notes.push(format!(
                        "{} report{}",
                        job.artifacts.reports.len(),
                        if job.artifacts.reports.len() == 1 { "" } else { "s" }
                    ));
                }
                if job.coverage.is_some() {
                    notes.push("coverage".to_string());
                }

                let suffix = if notes.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", notes.join(", "))
                };

                println!(
                    "    - {} ({} command{}){}",
                    job.name,
                    job.setup.len() + job.run.len(),
                    if job.setup.len() + job.run.len() == 1 { "" } else { "s" },
                    suffix.dimmed()
                );
            }
        }
    }

    println!();
    if warnings.is_empty() {
        println!("{}", "Pipeline is valid!".green().bold());
    } else {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    }

    Ok(ExitCode::from(exit_codes::SUCCESS))
}
