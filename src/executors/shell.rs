// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Local shell environments
//!
//! Runs job commands through `sh -c` (or a configured shell), each job in its
//! own workspace directory under the executor root. The workspace is removed
//! at teardown.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutcome, Executor, Session};
use crate::errors::StagehandError;
use crate::pipeline::definition::JobSpec;
use crate::pipeline::resolver::EnvironmentMap;

/// Executor backed by local shell processes
pub struct LocalShellExecutor {
    shell: String,
    root: PathBuf,
    counter: AtomicU64,
}

impl LocalShellExecutor {
    /// Create an executor using the given shell binary
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            root: std::env::temp_dir().join("stagehand"),
            counter: AtomicU64::new(0),
        }
    }

    /// Place job workspaces under `root` instead of the system temp dir
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }
}

impl Default for LocalShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl Executor for LocalShellExecutor {
    async fn create_session(&self, job: &JobSpec) -> Result<Box<dyn Session>, StagehandError> {
        if let Some(image) = &job.image {
            // Environment identifiers select images for container-backed
            // providers; local shells have nothing to do with them.
            debug!(job = %job.name, %image, "image identifier ignored by local shell provider");
        }

        let serial = self.counter.fetch_add(1, Ordering::Relaxed);
        let workspace = self.root.join(format!(
            "{}-{}-{}",
            sanitize(&job.name),
            std::process::id(),
            serial
        ));

        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            StagehandError::EnvironmentSetup {
                job: job.name.clone(),
                error: e.to_string(),
            }
        })?;

        debug!(job = %job.name, workspace = %workspace.display(), "created job workspace");

        Ok(Box::new(ShellSession {
            shell: self.shell.clone(),
            workspace,
            job: job.name.clone(),
        }))
    }

    async fn check_available(&self) -> Result<(), StagehandError> {
        which::which(&self.shell)
            .map(|_| ())
            .map_err(|_| StagehandError::ShellNotFound {
                shell: self.shell.clone(),
            })
    }

    fn name(&self) -> &str {
        "shell"
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

struct ShellSession {
    shell: String,
    workspace: PathBuf,
    job: String,
}

#[async_trait]
impl Session for ShellSession {
    async fn run_command(
        &mut self,
        command: &str,
        env: &EnvironmentMap,
    ) -> Result<CommandOutcome, StagehandError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        cmd.current_dir(&self.workspace);
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the in-flight future (cancellation, timeout) must not leak
        // the child process.
        cmd.kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| StagehandError::CommandSpawn {
                error: format!("{} ({})", e, self.shell),
            })?;

        Ok(CommandOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn workspace(&self) -> &Path {
        &self.workspace
    }

    async fn teardown(&mut self) -> Result<(), StagehandError> {
        match tokio::fs::remove_dir_all(&self.workspace).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagehandError::EnvironmentTeardown {
                job: self.job.clone(),
                error: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job(name: &str) -> JobSpec {
        let yaml = format!(
            "stages: [build]\njobs:\n  {}:\n    stage: build\n    run: [\"true\"]\n",
            name
        );
        crate::pipeline::definition::Pipeline::load(&yaml)
            .unwrap()
            .get_job(name)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = LocalShellExecutor::new("sh").with_root(tmp.path());
        let mut session = executor.create_session(&make_job("echoer")).await.unwrap();

        let outcome = session
            .run_command("echo hello", &EnvironmentMap::new())
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(outcome.stdout.contains("hello"));
        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = LocalShellExecutor::new("sh").with_root(tmp.path());
        let mut session = executor.create_session(&make_job("failer")).await.unwrap();

        let outcome = session
            .run_command("exit 3", &EnvironmentMap::new())
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, 3);
        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = LocalShellExecutor::new("sh").with_root(tmp.path());
        let mut session = executor.create_session(&make_job("env-job")).await.unwrap();

        let mut env = EnvironmentMap::new();
        env.insert("GREETING".into(), "bonjour".into());

        let outcome = session
            .run_command("echo $GREETING", &env)
            .await
            .unwrap();

        assert!(outcome.stdout.contains("bonjour"));
        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_workspaces_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = LocalShellExecutor::new("sh").with_root(tmp.path());

        let mut first = executor.create_session(&make_job("writer")).await.unwrap();
        let mut second = executor.create_session(&make_job("reader")).await.unwrap();

        first
            .run_command("echo secret > note.txt", &EnvironmentMap::new())
            .await
            .unwrap();

        let outcome = second
            .run_command("cat note.txt", &EnvironmentMap::new())
            .await
            .unwrap();

        assert!(!outcome.success());

        first.teardown().await.unwrap();
        second.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_removes_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = LocalShellExecutor::new("sh").with_root(tmp.path());
        let mut session = executor.create_session(&make_job("tidy")).await.unwrap();
        let workspace = session.workspace().to_path_buf();

        assert!(workspace.exists());
        session.teardown().await.unwrap();
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_missing_shell_reported() {
        let executor = LocalShellExecutor::new("definitely-not-a-shell");
        assert!(matches!(
            executor.check_available().await,
            Err(StagehandError::ShellNotFound { .. })
        ));
    }
}
