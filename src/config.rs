// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Engine configuration
//!
//! Run defaults live in `stagehand.toml`: the project-local file wins, then
//! the user config directory, then built-in defaults. Command-line flags
//! override everything here.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::errors::StagehandError;
use crate::pipeline::scheduler::FailPolicy;
use crate::utils::duration;

/// Engine-level defaults loaded from `stagehand.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    /// Scheduler and executor defaults
    pub defaults: Defaults,

    /// Retry hook; parsed and surfaced but not consumed by the engine core
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Defaults {
    /// Worker pool size
    pub workers: usize,

    /// Failure policy: `fast` or `continue`
    pub fail_policy: FailPolicy,

    /// Shell binary used by the local executor
    pub shell: String,

    /// Default per-job timeout for jobs that declare none
    pub job_timeout: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            workers: 4,
            fail_policy: FailPolicy::default(),
            shell: "sh".to_string(),
            job_timeout: None,
        }
    }
}

/// Hook for a future retry policy; `attempts` is not interpreted yet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub attempts: u32,
}

impl EngineConfig {
    /// Load configuration from the project directory, then the user config
    /// directory, then defaults
    pub fn load() -> Result<Self, StagehandError> {
        let project = Path::new("stagehand.toml");
        if project.exists() {
            debug!(path = %project.display(), "loading project configuration");
            return Self::from_path(project);
        }

        if let Some(dirs) = ProjectDirs::from("", "", "stagehand") {
            let user = dirs.config_dir().join("config.toml");
            if user.exists() {
                debug!(path = %user.display(), "loading user configuration");
                return Self::from_path(&user);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_path(path: &Path) -> Result<Self, StagehandError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StagehandError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        toml::from_str(&content).map_err(|e| StagehandError::InvalidConfig {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parsed default job timeout
    pub fn job_timeout(&self) -> Result<Option<Duration>, StagehandError> {
        self.defaults
            .job_timeout
            .as_deref()
            .map(duration::parse)
            .transpose()
    }
}
