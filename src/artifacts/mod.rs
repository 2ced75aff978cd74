// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Artifact and report collection
//!
//! Gathers a job's declared report files from its workspace according to the
//! retention policy. Declared paths may be globs. A path that matches nothing
//! is recorded as a warning, never a failure: a crashed tool is expected to
//! leave partial artifact sets behind.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::pipeline::definition::{ArtifactPolicy, Retention};
use crate::pipeline::job::JobStatus;

/// One collected report file, tagged with its declared kind
///
/// The contents are an opaque blob; the engine never parses report files.
#[derive(Debug, Clone, Serialize)]
pub struct CollectedArtifact {
    /// Declared report kind (`junit`, `coverage`, …)
    pub kind: String,

    /// Path relative to the job workspace
    pub path: PathBuf,

    /// File size
    pub size_bytes: usize,

    /// File contents
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// A declared report path that matched nothing at collection time
#[derive(Debug, Clone, Serialize)]
pub struct MissingArtifactWarning {
    /// Declared report kind
    pub kind: String,

    /// The declared path or glob
    pub pattern: String,
}

impl std::fmt::Display for MissingArtifactWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "declared {} report '{}' was not produced",
            self.kind, self.pattern
        )
    }
}

/// Whether the policy collects for the given terminal status
///
/// `Cancelled` and `TimedOut` match neither success nor failure.
fn applies(retention: Retention, status: JobStatus) -> bool {
    match retention {
        Retention::Always => true,
        Retention::OnSuccess => status == JobStatus::Success,
        Retention::OnFailure => status == JobStatus::Failure,
    }
}

/// Collect a job's declared artifacts from its workspace
///
/// Runs after the job reaches a terminal status and before its environment is
/// torn down.
pub fn collect(
    policy: &ArtifactPolicy,
    status: JobStatus,
    workspace: &Path,
) -> (Vec<CollectedArtifact>, Vec<MissingArtifactWarning>) {
    let mut artifacts = Vec::new();
    let mut warnings = Vec::new();

    if !applies(policy.retention, status) {
        debug!(
            retention = %policy.retention,
            status = %status,
            "retention policy does not apply; skipping collection"
        );
        return (artifacts, warnings);
    }

    for (kind, pattern) in &policy.reports {
        let full_pattern = workspace.join(pattern).to_string_lossy().to_string();
        let mut matched = false;

        // Patterns were validated at load time; a failure here means the
        // workspace path itself is not globbable.
        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(%kind, %pattern, error = %e, "artifact pattern could not be resolved");
                warnings.push(MissingArtifactWarning {
                    kind: kind.clone(),
                    pattern: pattern.clone(),
                });
                continue;
            }
        };

        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }

            match std::fs::read(&path) {
                Ok(bytes) => {
                    matched = true;
                    let relative = path
                        .strip_prefix(workspace)
                        .unwrap_or(&path)
                        .to_path_buf();
                    debug!(%kind, path = %relative.display(), size = bytes.len(), "collected artifact");
                    artifacts.push(CollectedArtifact {
                        kind: kind.clone(),
                        path: relative,
                        size_bytes: bytes.len(),
                        bytes,
                    });
                }
                Err(e) => {
                    warn!(%kind, path = %path.display(), error = %e, "artifact could not be read");
                }
            }
        }

        if !matched {
            let warning = MissingArtifactWarning {
                kind: kind.clone(),
                pattern: pattern.clone(),
            };
            warn!(%warning, "missing artifact");
            warnings.push(warning);
        }
    }

    (artifacts, warnings)
}
