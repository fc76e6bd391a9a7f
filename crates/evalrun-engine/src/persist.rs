//! Writing run artifacts to disk.
//!
//! Each run directory holds five pretty-printed JSON files. They are written
//! into a hidden sibling directory first and renamed into place, so a run
//! directory is either complete or absent.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use evalrun_core::{PerInstanceStats, RunSpec, ScenarioState, Stat, EVAL_CACHE_DIR};
use serde::Serialize;

use crate::collaborators::ScenarioMetadata;

pub const RUN_SPEC_FILE: &str = "run_spec.json";
pub const SCENARIO_FILE: &str = "scenario.json";
pub const SCENARIO_STATE_FILE: &str = "scenario_state.json";
pub const STATS_FILE: &str = "stats.json";
pub const PER_INSTANCE_STATS_FILE: &str = "per_instance_stats.json";

/// Everything persisted for one run.
pub struct RunArtifacts<'a> {
    pub run_spec: &'a RunSpec,
    pub scenario: &'a ScenarioMetadata,
    pub scenario_state: &'a ScenarioState,
    pub stats: &'a [Stat],
    pub per_instance_stats: &'a [PerInstanceStats],
}

fn write_json<T: Serialize + ?Sized>(dir: &Path, file: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", file))?;
    fs::write(dir.join(file), json).with_context(|| format!("failed to write {}", file))?;
    Ok(())
}

/// Resolve the directory for `run_name`, which must be exactly one child of
/// `runs_path` and not the shared eval cache.
pub fn run_dir(runs_path: &Path, run_name: &str) -> anyhow::Result<PathBuf> {
    let mut components = Path::new(run_name).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || run_name.starts_with('.') || run_name == EVAL_CACHE_DIR {
        bail!("refusing to use {:?} as a run directory", run_name);
    }
    let run_path = runs_path.join(run_name);
    if run_path.parent() != Some(runs_path) {
        bail!("run directory {} is outside {}", run_path.display(), runs_path.display());
    }
    Ok(run_path)
}

/// Write `artifacts` to `<runs_path>/<run name>`, replacing any previous
/// contents. Returns the run directory.
pub fn write_run_artifacts(runs_path: &Path, artifacts: &RunArtifacts<'_>) -> anyhow::Result<PathBuf> {
    let run_name = artifacts.run_spec.name();
    let run_path = run_dir(runs_path, run_name)?;

    fs::create_dir_all(runs_path)
        .with_context(|| format!("failed to create {}", runs_path.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(&format!(".{}.", run_name))
        .tempdir_in(runs_path)
        .context("failed to create staging directory")?;

    write_json(staging.path(), RUN_SPEC_FILE, artifacts.run_spec)?;
    write_json(staging.path(), SCENARIO_FILE, artifacts.scenario)?;
    write_json(staging.path(), SCENARIO_STATE_FILE, artifacts.scenario_state)?;
    write_json(staging.path(), STATS_FILE, artifacts.stats)?;
    write_json(staging.path(), PER_INSTANCE_STATS_FILE, artifacts.per_instance_stats)?;

    if run_path.exists() {
        fs::remove_dir_all(&run_path)
            .with_context(|| format!("failed to remove previous {}", run_path.display()))?;
    }
    fs::rename(staging.path(), &run_path)
        .with_context(|| format!("failed to move artifacts into {}", run_path.display()))?;

    tracing::debug!(path = %run_path.display(), "run artifacts written");
    Ok(run_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalrun_core::{AdapterSpec, ObjectSpec};

    fn run_spec(name: &str) -> RunSpec {
        RunSpec::new(name, ObjectSpec::new("file"), AdapterSpec::default(), vec![])
            .expect("valid run name")
    }

    fn metadata() -> ScenarioMetadata {
        ScenarioMetadata {
            name: "demo".to_string(),
            description: String::new(),
            tags: vec![],
            output_path: None,
        }
    }

    #[test]
    fn test_writes_all_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = run_spec("demo:x=1");
        let state = ScenarioState::new(AdapterSpec::default(), vec![]);
        let mut stat = Stat::new("accuracy");
        stat.add(1.0);

        let path = write_run_artifacts(
            dir.path(),
            &RunArtifacts {
                run_spec: &spec,
                scenario: &metadata(),
                scenario_state: &state,
                stats: &[stat],
                per_instance_stats: &[],
            },
        )
        .expect("write");

        assert_eq!(path, dir.path().join("demo:x=1"));
        for file in [
            RUN_SPEC_FILE,
            SCENARIO_FILE,
            SCENARIO_STATE_FILE,
            STATS_FILE,
            PER_INSTANCE_STATS_FILE,
        ] {
            assert!(path.join(file).is_file(), "missing {}", file);
        }

        let scenario = fs::read_to_string(path.join(SCENARIO_FILE)).expect("read");
        assert!(!scenario.contains("output_path"));
        assert!(scenario.contains("\n  \"name\""));

        // Only the run directory remains; the staging directory is gone.
        let entries: Vec<_> = fs::read_dir(dir.path()).expect("read_dir").collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_rewrite_replaces_previous_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = run_spec("demo");
        let state = ScenarioState::new(AdapterSpec::default(), vec![]);
        let artifacts = RunArtifacts {
            run_spec: &spec,
            scenario: &metadata(),
            scenario_state: &state,
            stats: &[],
            per_instance_stats: &[],
        };

        let path = write_run_artifacts(dir.path(), &artifacts).expect("first");
        fs::write(path.join("stale.txt"), "old").expect("stale");
        write_run_artifacts(dir.path(), &artifacts).expect("second");
        assert!(!path.join("stale.txt").exists());
        assert!(path.join(STATS_FILE).exists());
    }

    #[test]
    fn test_run_dir_must_be_a_single_child() {
        let runs = Path::new("/tmp/runs/suite");
        assert_eq!(run_dir(runs, "demo").expect("demo"), runs.join("demo"));
        assert!(run_dir(runs, "bbq:subject=age").is_ok());
        for name in ["", ".", "..", "./", "a/b", "../other", "/etc", ".staging", EVAL_CACHE_DIR] {
            assert!(run_dir(runs, name).is_err(), "{:?} accepted", name);
        }
    }

    #[test]
    fn test_suite_and_cache_survive_rewrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = dir.path().join(EVAL_CACHE_DIR);
        fs::create_dir_all(&cache).expect("cache dir");
        fs::write(cache.join("entry.json"), "1").expect("entry");

        let spec = run_spec("demo");
        let state = ScenarioState::new(AdapterSpec::default(), vec![]);
        let artifacts = RunArtifacts {
            run_spec: &spec,
            scenario: &metadata(),
            scenario_state: &state,
            stats: &[],
            per_instance_stats: &[],
        };
        write_run_artifacts(dir.path(), &artifacts).expect("first");
        write_run_artifacts(dir.path(), &artifacts).expect("second");
        assert!(cache.join("entry.json").exists());
        assert!(dir.path().join("demo").join(STATS_FILE).exists());
    }
}
