// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Variable resolution
//!
//! Computes a job's effective environment by layering bindings in increasing
//! precedence: ambient process environment, engine-provided job context,
//! pipeline globals, then the job's own (fragment-merged) variables. Later
//! layers overwrite identically named keys wholesale; values are never
//! spliced together.
//!
//! The functions here are pure: the ambient layer is injected by the caller,
//! so the same inputs always produce the same map.

use indexmap::IndexMap;

use crate::pipeline::definition::{JobSpec, Pipeline};

/// A job's effective environment
pub type EnvironmentMap = IndexMap<String, String>;

/// Snapshot the ambient process environment
pub fn ambient_env() -> EnvironmentMap {
    std::env::vars().collect()
}

/// Compute the effective environment for one job
///
/// Precedence, low to high: `ambient` → engine context variables
/// (`STAGEHAND_PIPELINE`, `STAGEHAND_STAGE`, `STAGEHAND_JOB`) → pipeline
/// globals → job variables.
pub fn effective_env(
    pipeline: &Pipeline,
    job: &JobSpec,
    ambient: &EnvironmentMap,
) -> EnvironmentMap {
    let mut env = ambient.clone();

    env.insert("STAGEHAND_PIPELINE".to_string(), pipeline.name.clone());
    env.insert("STAGEHAND_STAGE".to_string(), job.stage.clone());
    env.insert("STAGEHAND_JOB".to_string(), job.name.clone());

    for (key, value) in &pipeline.variables {
        env.insert(key.clone(), value.clone());
    }

    for (key, value) in &job.variables {
        env.insert(key.clone(), value.clone());
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pipeline() -> Pipeline {
        let yaml = r#"
name: env-test
stages: [build]
variables:
  SHARED: global
  GLOBAL_ONLY: global
jobs:
  job:
    stage: build
    variables:
      SHARED: job
      JOB_ONLY: job
    run: [go]
"#;
        Pipeline::load(yaml).unwrap()
    }

    #[test]
    fn test_precedence_layering() {
        let pipeline = make_pipeline();
        let job = pipeline.get_job("job").unwrap();

        let mut ambient = EnvironmentMap::new();
        ambient.insert("SHARED".into(), "ambient".into());
        ambient.insert("AMBIENT_ONLY".into(), "ambient".into());

        let env = effective_env(&pipeline, job, &ambient);

        assert_eq!(env.get("SHARED").unwrap(), "job");
        assert_eq!(env.get("GLOBAL_ONLY").unwrap(), "global");
        assert_eq!(env.get("JOB_ONLY").unwrap(), "job");
        assert_eq!(env.get("AMBIENT_ONLY").unwrap(), "ambient");
    }

    #[test]
    fn test_engine_context_variables() {
        let pipeline = make_pipeline();
        let job = pipeline.get_job("job").unwrap();
        let env = effective_env(&pipeline, job, &EnvironmentMap::new());

        assert_eq!(env.get("STAGEHAND_PIPELINE").unwrap(), "env-test");
        assert_eq!(env.get("STAGEHAND_STAGE").unwrap(), "build");
        assert_eq!(env.get("STAGEHAND_JOB").unwrap(), "job");
    }

    #[test]
    fn test_job_variables_override_engine_context() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    stage: build
    variables:
      STAGEHAND_JOB: masked
    run: [go]
"#;
        let pipeline = Pipeline::load(yaml).unwrap();
        let job = pipeline.get_job("job").unwrap();
        let env = effective_env(&pipeline, job, &EnvironmentMap::new());

        assert_eq!(env.get("STAGEHAND_JOB").unwrap(), "masked");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let pipeline = make_pipeline();
        let job = pipeline.get_job("job").unwrap();
        let ambient = EnvironmentMap::new();

        let first = effective_env(&pipeline, job, &ambient);
        let second = effective_env(&pipeline, job, &ambient);

        assert_eq!(first, second);
        assert!(first.keys().eq(second.keys()));
    }

    #[test]
    fn test_values_replace_wholesale() {
        let pipeline = make_pipeline();
        let job = pipeline.get_job("job").unwrap();

        let mut ambient = EnvironmentMap::new();
        ambient.insert("SHARED".into(), "long-ambient-value".into());

        let env = effective_env(&pipeline, job, &ambient);
        assert_eq!(env.get("SHARED").unwrap(), "job");
    }
}
