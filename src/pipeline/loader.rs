// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Pipeline loading and fragment resolution
//!
//! Turns a raw specification document into a fully materialized [`Pipeline`]:
//! builds the fragment table, resolves `extends` references in topological
//! order, overlays each job's local fields, and validates the result. Cycle
//! detection runs on the fragment reference graph before any merging, so
//! resolution always terminates in one pass per fragment.

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::errors::StagehandError;
use crate::pipeline::definition::{
    ArtifactPolicy, JobSpec, Pipeline, RawArtifacts, RawDocument, RawEntry, RawFields,
};
use crate::utils::duration;

/// Parse and resolve a pipeline document
pub(crate) fn load(yaml: &str) -> Result<Pipeline, StagehandError> {
    let doc: RawDocument = serde_yaml::from_str(yaml)?;
    resolve(doc)
}

fn resolve(doc: RawDocument) -> Result<Pipeline, StagehandError> {
    if doc.stages.is_empty() {
        return Err(StagehandError::invalid_pipeline("no stages defined"));
    }

    let mut seen_stages = HashSet::new();
    for stage in &doc.stages {
        if !seen_stages.insert(stage.as_str()) {
            return Err(StagehandError::DuplicateStage {
                stage: stage.clone(),
            });
        }
    }

    // Fragment table: the `fragments:` section plus hidden `.name` jobs.
    let mut fragments: IndexMap<String, RawEntry> = doc.fragments;
    let mut jobs: IndexMap<String, RawEntry> = IndexMap::new();

    for (name, entry) in doc.jobs {
        match name.strip_prefix('.') {
            Some(hidden) => {
                if fragments.contains_key(hidden) {
                    return Err(StagehandError::DuplicateDefinition {
                        name: hidden.to_string(),
                    });
                }
                fragments.insert(hidden.to_string(), entry);
            }
            None => {
                jobs.insert(name, entry);
            }
        }
    }

    let resolved_fragments = resolve_fragments(&fragments)?;

    let mut out_jobs = IndexMap::new();
    for (name, entry) in &jobs {
        let fields = flatten_entry(name, entry, &resolved_fragments)?;
        let spec = materialize(name, fields, &doc.stages)?;
        out_jobs.insert(name.clone(), spec);
    }

    Ok(Pipeline {
        name: doc.name,
        stages: doc.stages,
        variables: doc.variables,
        jobs: out_jobs,
    })
}

/// Resolve every fragment to its flattened field set
///
/// Fragments may extend other fragments; references form a DAG. Resolution
/// walks the graph in topological order so each fragment is flattened exactly
/// once.
fn resolve_fragments(
    fragments: &IndexMap<String, RawEntry>,
) -> Result<HashMap<String, RawFields>, StagehandError> {
    let mut graph: DiGraph<(), ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    let mut names: HashMap<NodeIndex, &str> = HashMap::new();

    for name in fragments.keys() {
        let node = graph.add_node(());
        nodes.insert(name.as_str(), node);
        names.insert(node, name.as_str());
    }

    for (name, entry) in fragments {
        for reference in &entry.extends {
            let referenced = nodes.get(reference.as_str()).ok_or_else(|| {
                StagehandError::UnknownFragment {
                    referrer: name.clone(),
                    fragment: reference.clone(),
                }
            })?;

            // Edge referenced → referrer, so toposort yields referenced first
            graph.add_edge(*referenced, nodes[name.as_str()], ());
        }
    }

    let order = toposort(&graph, None).map_err(|cycle| {
        let start = names[&cycle.node_id()];
        StagehandError::CyclicFragmentReference {
            cycle: find_cycle_members(start, fragments),
        }
    })?;

    let mut resolved: HashMap<String, RawFields> = HashMap::new();

    for node in order {
        let name = names[&node];
        let entry = &fragments[name];
        let mut fields = RawFields::default();

        for reference in &entry.extends {
            fields = merge_fields(fields, resolved[reference.as_str()].clone());
        }

        resolved.insert(name.to_string(), merge_fields(fields, entry.fields.clone()));
    }

    Ok(resolved)
}

/// Name the members of a reference cycle starting from a node known to be on one
fn find_cycle_members(start: &str, fragments: &IndexMap<String, RawEntry>) -> Vec<String> {
    let mut path = vec![start.to_string()];
    let mut visited = HashSet::new();

    if walk_back_to(start, start, fragments, &mut path, &mut visited) {
        path.push(start.to_string());
    }

    path
}

fn walk_back_to(
    current: &str,
    start: &str,
    fragments: &IndexMap<String, RawEntry>,
    path: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> bool {
    let Some(entry) = fragments.get(current) else {
        return false;
    };

    for reference in &entry.extends {
        if reference == start {
            return true;
        }
        if fragments.contains_key(reference.as_str()) && visited.insert(reference.clone()) {
            path.push(reference.clone());
            if walk_back_to(reference, start, fragments, path, visited) {
                return true;
            }
            path.pop();
        }
    }

    false
}

/// Flatten a job entry: referenced fragments in order, then local fields
fn flatten_entry(
    name: &str,
    entry: &RawEntry,
    fragments: &HashMap<String, RawFields>,
) -> Result<RawFields, StagehandError> {
    let mut fields = RawFields::default();

    for reference in &entry.extends {
        let fragment =
            fragments
                .get(reference.as_str())
                .ok_or_else(|| StagehandError::UnknownFragment {
                    referrer: name.to_string(),
                    fragment: reference.clone(),
                })?;

        fields = merge_fields(fields, fragment.clone());
    }

    Ok(merge_fields(fields, entry.fields.clone()))
}

/// Overlay `layer` on `base`
///
/// Scalar and sequence fields replace wholesale; `variables` and
/// `artifacts.reports` merge key-wise with `layer` winning per key.
fn merge_fields(base: RawFields, layer: RawFields) -> RawFields {
    RawFields {
        stage: layer.stage.or(base.stage),
        image: layer.image.or(base.image),
        variables: merge_maps(base.variables, layer.variables),
        setup: layer.setup.or(base.setup),
        run: layer.run.or(base.run),
        artifacts: merge_artifacts(base.artifacts, layer.artifacts),
        coverage: layer.coverage.or(base.coverage),
        timeout: layer.timeout.or(base.timeout),
    }
}

fn merge_maps(
    base: Option<IndexMap<String, String>>,
    layer: Option<IndexMap<String, String>>,
) -> Option<IndexMap<String, String>> {
    match (base, layer) {
        (Some(mut base), Some(layer)) => {
            base.extend(layer);
            Some(base)
        }
        (base, layer) => layer.or(base),
    }
}

fn merge_artifacts(
    base: Option<RawArtifacts>,
    layer: Option<RawArtifacts>,
) -> Option<RawArtifacts> {
    match (base, layer) {
        (Some(base), Some(layer)) => Some(RawArtifacts {
            when: layer.when.or(base.when),
            reports: merge_maps(base.reports, layer.reports),
        }),
        (base, layer) => layer.or(base),
    }
}

/// Turn flattened fields into a validated [`JobSpec`]
fn materialize(
    name: &str,
    fields: RawFields,
    stages: &[String],
) -> Result<JobSpec, StagehandError> {
    let stage = fields.stage.ok_or_else(|| StagehandError::InvalidJob {
        job: name.to_string(),
        reason: "missing 'stage'".to_string(),
    })?;

    if !stages.iter().any(|s| *s == stage) {
        return Err(StagehandError::UnknownStage {
            job: name.to_string(),
            stage,
        });
    }

    let run = fields.run.unwrap_or_default();
    if run.is_empty() {
        return Err(StagehandError::InvalidJob {
            job: name.to_string(),
            reason: "no run commands".to_string(),
        });
    }

    let artifacts = match fields.artifacts {
        Some(raw) => ArtifactPolicy {
            retention: raw.when.unwrap_or_default(),
            reports: raw.reports.unwrap_or_default(),
        },
        None => ArtifactPolicy::default(),
    };

    for pattern in artifacts.reports.values() {
        glob::Pattern::new(pattern).map_err(|e| StagehandError::InvalidArtifactPattern {
            job: name.to_string(),
            pattern: pattern.clone(),
            error: e.to_string(),
        })?;
    }

    if let Some(pattern) = &fields.coverage {
        Regex::new(pattern).map_err(|e| StagehandError::InvalidCoveragePattern {
            job: name.to_string(),
            pattern: pattern.clone(),
            error: e.to_string(),
        })?;
    }

    let timeout = fields.timeout.as_deref().map(duration::parse).transpose()?;

    Ok(JobSpec {
        name: name.to_string(),
        stage,
        image: fields.image,
        variables: fields.variables.unwrap_or_default(),
        setup: fields.setup.unwrap_or_default(),
        run,
        artifacts,
        coverage: fields.coverage,
        timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::Retention;
    use std::time::Duration;

    #[test]
    fn test_load_simple_pipeline() {
        let yaml = r#"
name: demo
stages: [build, test]
variables:
  RUST_BACKTRACE: "1"
jobs:
  build-job:
    stage: build
    image: rust:1.75
    run:
      - cargo build
  test-job:
    stage: test
    setup:
      - rustup component add llvm-tools
    run:
      - cargo test
    timeout: 5m
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        assert_eq!(pipeline.name, "demo");
        assert_eq!(pipeline.stages, vec!["build", "test"]);
        assert_eq!(pipeline.jobs.len(), 2);

        let build = pipeline.get_job("build-job").unwrap();
        assert_eq!(build.stage, "build");
        assert_eq!(build.image.as_deref(), Some("rust:1.75"));
        assert_eq!(build.run, vec!["cargo build"]);

        let test = pipeline.get_job("test-job").unwrap();
        assert_eq!(test.setup, vec!["rustup component add llvm-tools"]);
        assert_eq!(test.timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_fragment_shared_by_two_jobs() {
        let yaml = r#"
stages: [build]
fragments:
  base:
    setup: [prepare]
jobs:
  job1:
    extends: base
    stage: build
    run: [compile]
  job2:
    extends: base
    stage: build
    run: [lint]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        let job1 = pipeline.get_job("job1").unwrap();
        let job2 = pipeline.get_job("job2").unwrap();

        assert_eq!(
            job1.commands().collect::<Vec<_>>(),
            vec!["prepare", "compile"]
        );
        assert_eq!(job2.commands().collect::<Vec<_>>(), vec!["prepare", "lint"]);
    }

    #[test]
    fn test_local_sequence_replaces_fragment_sequence() {
        let yaml = r#"
stages: [build]
fragments:
  base:
    setup: [a, b]
jobs:
  job:
    extends: base
    stage: build
    setup: [x]
    run: [go]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        assert_eq!(pipeline.get_job("job").unwrap().setup, vec!["x"]);
    }

    #[test]
    fn test_variables_merge_key_wise() {
        let yaml = r#"
stages: [build]
fragments:
  base:
    variables:
      X: "1"
      Y: "2"
jobs:
  job:
    extends: base
    stage: build
    variables:
      Y: "3"
      Z: "4"
    run: [go]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        let vars = &pipeline.get_job("job").unwrap().variables;
        assert_eq!(vars.get("X").unwrap(), "1");
        assert_eq!(vars.get("Y").unwrap(), "3");
        assert_eq!(vars.get("Z").unwrap(), "4");
    }

    #[test]
    fn test_fragments_merge_in_reference_order() {
        let yaml = r#"
stages: [build]
fragments:
  first:
    image: alpha
  second:
    image: beta
jobs:
  job:
    extends: [first, second]
    stage: build
    run: [go]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        assert_eq!(
            pipeline.get_job("job").unwrap().image.as_deref(),
            Some("beta")
        );
    }

    #[test]
    fn test_nested_fragments_resolve() {
        let yaml = r#"
stages: [build]
fragments:
  grandparent:
    image: base-image
    variables:
      A: "1"
  parent:
    extends: grandparent
    variables:
      B: "2"
jobs:
  job:
    extends: parent
    stage: build
    run: [go]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        let job = pipeline.get_job("job").unwrap();
        assert_eq!(job.image.as_deref(), Some("base-image"));
        assert_eq!(job.variables.get("A").unwrap(), "1");
        assert_eq!(job.variables.get("B").unwrap(), "2");
    }

    #[test]
    fn test_hidden_job_acts_as_fragment() {
        let yaml = r#"
stages: [deploy]
jobs:
  .deploy-base:
    image: deployer
  release:
    extends: deploy-base
    stage: deploy
    run: [ship]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        assert_eq!(pipeline.jobs.len(), 1);
        assert_eq!(
            pipeline.get_job("release").unwrap().image.as_deref(),
            Some("deployer")
        );
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let yaml = r#"
stages: [build]
fragments:
  base:
    image: one
jobs:
  .base:
    image: two
  job:
    stage: build
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::DuplicateDefinition { name } if name == "base"
        ));
    }

    #[test]
    fn test_self_cycle_detected() {
        let yaml = r#"
stages: [build]
fragments:
  a:
    extends: a
jobs:
  job:
    stage: build
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        match err {
            StagehandError::CyclicFragmentReference { cycle } => {
                assert!(cycle.contains(&"a".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let yaml = r#"
stages: [build]
fragments:
  a:
    extends: b
  b:
    extends: a
jobs:
  job:
    stage: build
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        match err {
            StagehandError::CyclicFragmentReference { cycle } => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_cycle_detected() {
        let yaml = r#"
stages: [build]
fragments:
  a:
    extends: b
  b:
    extends: c
  c:
    extends: d
  d:
    extends: a
jobs:
  job:
    stage: build
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::CyclicFragmentReference { .. }
        ));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    stage: deploy
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::UnknownStage { job, stage } if job == "job" && stage == "deploy"
        ));
    }

    #[test]
    fn test_unknown_fragment_rejected() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    extends: missing
    stage: build
    run: [go]
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::UnknownFragment { fragment, .. } if fragment == "missing"
        ));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let yaml = "stages: [build, build]\n";
        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(err, StagehandError::DuplicateStage { .. }));
    }

    #[test]
    fn test_job_without_run_rejected() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    stage: build
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(err, StagehandError::InvalidJob { .. }));
    }

    #[test]
    fn test_invalid_coverage_pattern_rejected() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    stage: build
    run: [go]
    coverage: "TOTAL ([0-9"
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(
            err,
            StagehandError::InvalidCoveragePattern { .. }
        ));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let yaml = r#"
stages: [build]
jobs:
  job:
    stage: build
    run: [go]
    timeout: soon
"#;

        let err = Pipeline::load(yaml).unwrap_err();
        assert!(matches!(err, StagehandError::InvalidDuration { .. }));
    }

    #[test]
    fn test_artifact_policy_materializes() {
        let yaml = r#"
stages: [test]
jobs:
  job:
    stage: test
    run: [go]
    artifacts:
      when: always
      reports:
        junit: reports/junit.xml
        coverage: coverage.xml
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        let policy = &pipeline.get_job("job").unwrap().artifacts;
        assert_eq!(policy.retention, Retention::Always);
        assert_eq!(policy.reports.len(), 2);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let yaml = r#"
name: demo
stages: [build, test]
variables:
  V: "1"
fragments:
  base:
    setup: [prep]
    variables:
      W: "2"
jobs:
  build-job:
    extends: base
    stage: build
    run: [compile]
    artifacts:
      when: on-failure
      reports:
        junit: junit.xml
    coverage: '([0-9.]+)%'
    timeout: 90s
  test-job:
    stage: test
    run: [check]
"#;

        let first = Pipeline::load(yaml).unwrap();
        let reloaded = Pipeline::load(&first.to_yaml().unwrap()).unwrap();
        assert_eq!(first, reloaded);

        let again = Pipeline::load(&reloaded.to_yaml().unwrap()).unwrap();
        assert_eq!(reloaded, again);
    }

    #[test]
    fn test_fragment_resolution_is_independent_per_job() {
        // A fragment referenced many times contributes the same fields each
        // time; one job's overrides never leak into another.
        let yaml = r#"
stages: [build]
fragments:
  base:
    variables:
      KEY: "fragment"
jobs:
  override:
    extends: base
    stage: build
    variables:
      KEY: "local"
    run: [go]
  plain:
    extends: base
    stage: build
    run: [go]
"#;

        let pipeline = Pipeline::load(yaml).unwrap();
        assert_eq!(
            pipeline.get_job("override").unwrap().variables.get("KEY").unwrap(),
            "local"
        );
        assert_eq!(
            pipeline.get_job("plain").unwrap().variables.get("KEY").unwrap(),
            "fragment"
        );
    }
}
