// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for stagehand.

use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::{FailPolicy, JobStatus};

pub mod run;
pub mod validate;
pub mod watch;

/// Process exit codes, one per outcome class
pub mod exit_codes {
    /// Overall status was success
    pub const SUCCESS: u8 = 0;
    /// At least one job failed
    pub const JOB_FAILURE: u8 = 1;
    /// The specification or engine configuration was invalid
    pub const CONFIGURATION: u8 = 2;
    /// The run was cancelled or timed out
    pub const INTERRUPTED: u8 = 3;
}

/// Declarative pipeline execution engine
///
/// Run YAML-defined stages and jobs in isolated environments.
#[derive(Parser, Debug)]
#[clap(
    name = "stagehand",
    version,
    about = "Declarative pipeline execution engine",
    long_about = None,
    after_help = "Examples:\n\
        stagehand run                   Execute .stagehand.yaml\n\
        stagehand run ci.yaml --workers 8\n\
        stagehand validate              Check the specification\n\
        stagehand watch                 Re-run on file changes\n\n\
        See 'stagehand <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Pipeline specification file
        #[clap(default_value = ".stagehand.yaml")]
        spec: PathBuf,

        /// Worker pool size (minimum 1)
        #[clap(long, value_name = "N", visible_alias = "worker-pool")]
        workers: Option<usize>,

        /// Failure policy: fast | continue
        #[clap(long, value_name = "POLICY")]
        fail_policy: Option<FailPolicy>,

        /// Bound on the whole run (e.g. 30m)
        #[clap(long, value_name = "DURATION", value_parser = crate::utils::duration::parse)]
        timeout: Option<Duration>,

        /// Default per-job timeout for jobs that declare none
        #[clap(long, value_name = "DURATION", value_parser = crate::utils::duration::parse)]
        job_timeout: Option<Duration>,

        /// Output format: text | json
        #[clap(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate the pipeline specification
    Validate {
        /// Pipeline specification file
        #[clap(default_value = ".stagehand.yaml")]
        spec: PathBuf,
    },

    /// Watch mode - re-run the pipeline on file changes
    Watch {
        /// Pipeline specification file
        #[clap(default_value = ".stagehand.yaml")]
        spec: PathBuf,

        /// Debounce delay in milliseconds
        #[clap(long, default_value = "500")]
        debounce: u64,
    },
}

/// Output format for the run command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Status glyph used in per-job output lines
pub(crate) fn status_glyph(status: JobStatus) -> ColoredString {
    match status {
        JobStatus::Success => "✓".green(),
        JobStatus::Failure => "✗".red(),
        JobStatus::Cancelled => "⊘".yellow(),
        JobStatus::TimedOut => "⏱".red(),
    }
}
