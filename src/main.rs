// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! stagehand - Declarative Pipeline Execution Engine
//!
//! Load a pipeline specification, schedule its jobs across stage barriers,
//! and collect artifacts and coverage.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagehand::cli::{exit_codes, Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagehand=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        if let Err(e) = std::env::set_current_dir(dir) {
            eprintln!("Failed to change to directory '{}': {}", dir.display(), e);
            return ExitCode::from(exit_codes::CONFIGURATION);
        }
    }

    // Dispatch to command handlers
    let outcome = match cli.command {
        Commands::Run {
            spec,
            workers,
            fail_policy,
            timeout,
            job_timeout,
            format,
        } => {
            stagehand::cli::run::run(
                spec,
                workers,
                fail_policy,
                timeout,
                job_timeout,
                format,
                cli.verbose,
            )
            .await
        }
        Commands::Validate { spec } => stagehand::cli::validate::run(spec, cli.verbose).await,
        Commands::Watch { spec, debounce } => {
            stagehand::cli::watch::run(spec, debounce, cli.verbose).await
        }
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(exit_codes::CONFIGURATION)
        }
    }
}
