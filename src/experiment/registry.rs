//! Thread-safe registry of policy experiments and their shadows.
//!
//! Writers hold a single lock; readers get defensive copies. Experiment
//! metadata persists under `<storage>/<id>/metadata.json` and shadows
//! append to `<storage>/<id>/shadows.jsonl`, so a crashed process can
//! recover what it was running.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{PolicyExperiment, ShadowExecution};
use crate::error::{Error, Result};

struct RegistryState {
    experiments: HashMap<String, PolicyExperiment>,
    shadows: HashMap<String, Vec<ShadowExecution>>,
    /// Registration order; active-experiment selection is deterministic.
    order: Vec<String>,
}

/// Centralized registry for policy experiments.
pub struct ExperimentRegistry {
    storage_path: PathBuf,
    state: Mutex<RegistryState>,
}

impl ExperimentRegistry {
    pub fn open(storage_path: impl AsRef<Path>) -> Result<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_path)?;
        Ok(Self {
            storage_path,
            state: Mutex::new(RegistryState {
                experiments: HashMap::new(),
                shadows: HashMap::new(),
                order: Vec::new(),
            }),
        })
    }

    /// Register a new experiment and persist its metadata.
    pub fn register_experiment(&self, experiment: PolicyExperiment) -> Result<()> {
        let id = experiment.experiment_id.clone();
        self.persist_metadata(&experiment)?;

        let mut state = self.state.lock().expect("experiment registry lock poisoned");
        if !state.experiments.contains_key(&id) {
            state.order.push(id.clone());
        }
        state.shadows.entry(id.clone()).or_default();
        state.experiments.insert(id.clone(), experiment);
        info!(experiment_id = %id, "registered experiment");
        Ok(())
    }

    /// Mark an experiment started. Idempotent once started.
    pub fn start_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = {
            let mut state = self.state.lock().expect("experiment registry lock poisoned");
            let experiment = state
                .experiments
                .get_mut(experiment_id)
                .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
            if experiment.started_at.is_none() {
                experiment.started_at = Some(Utc::now());
            }
            experiment.clone()
        };
        self.persist_metadata(&experiment)
    }

    /// Mark an experiment ended. Shadow writes are rejected afterwards.
    pub fn end_experiment(&self, experiment_id: &str) -> Result<()> {
        let experiment = {
            let mut state = self.state.lock().expect("experiment registry lock poisoned");
            let experiment = state
                .experiments
                .get_mut(experiment_id)
                .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
            if experiment.ended_at.is_none() {
                experiment.ended_at = Some(Utc::now());
            }
            experiment.clone()
        };
        self.persist_metadata(&experiment)
    }

    /// Snapshot of currently active experiments, in registration order.
    pub fn get_active_experiments(&self) -> Vec<PolicyExperiment> {
        let state = self.state.lock().expect("experiment registry lock poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.experiments.get(id))
            .filter(|e| e.is_active())
            .cloned()
            .collect()
    }

    pub fn get_experiment(&self, experiment_id: &str) -> Option<PolicyExperiment> {
        let state = self.state.lock().expect("experiment registry lock poisoned");
        state.experiments.get(experiment_id).cloned()
    }

    /// Store a finished causal summary back on the experiment.
    pub fn attach_summary(
        &self,
        experiment_id: &str,
        summary: super::types::CausalSummary,
    ) -> Result<()> {
        let experiment = {
            let mut state = self.state.lock().expect("experiment registry lock poisoned");
            let experiment = state
                .experiments
                .get_mut(experiment_id)
                .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
            experiment.causal_summary = Some(summary);
            experiment.clone()
        };
        self.persist_metadata(&experiment)
    }

    /// Record a shadow execution, appending to the experiment's JSONL.
    ///
    /// Rejected once `ended_at` is set: a shadow arriving after the
    /// experiment closed cannot belong to its analysis window.
    pub fn record_shadow_execution(
        &self,
        experiment_id: &str,
        shadow: ShadowExecution,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().expect("experiment registry lock poisoned");
            let experiment = state
                .experiments
                .get(experiment_id)
                .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))?;
            if experiment.is_complete() {
                return Err(Error::ExperimentEnded(experiment_id.to_string()));
            }
            state
                .shadows
                .entry(experiment_id.to_string())
                .or_default()
                .push(shadow.clone());
        }
        self.persist_shadow(experiment_id, &shadow)?;
        debug!(
            experiment_id,
            execution_id = %shadow.execution_id,
            comparable = shadow.comparable,
            "recorded shadow execution"
        );
        Ok(())
    }

    /// Defensive copy of all shadows for an experiment.
    pub fn get_shadow_executions(&self, experiment_id: &str) -> Vec<ShadowExecution> {
        let state = self.state.lock().expect("experiment registry lock poisoned");
        state
            .shadows
            .get(experiment_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn list_experiments(&self) -> Vec<String> {
        let state = self.state.lock().expect("experiment registry lock poisoned");
        state.order.clone()
    }

    fn experiment_dir(&self, experiment_id: &str) -> PathBuf {
        self.storage_path.join(experiment_id)
    }

    fn persist_metadata(&self, experiment: &PolicyExperiment) -> Result<()> {
        let dir = self.experiment_dir(&experiment.experiment_id);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(experiment)?;
        std::fs::write(dir.join("metadata.json"), json)?;
        Ok(())
    }

    fn persist_shadow(&self, experiment_id: &str, shadow: &ShadowExecution) -> Result<()> {
        let dir = self.experiment_dir(experiment_id);
        std::fs::create_dir_all(&dir)?;
        let mut line = serde_json::to_string(shadow)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("shadows.jsonl"))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Recover an experiment's metadata from disk.
    pub fn load_experiment(&self, experiment_id: &str) -> Result<PolicyExperiment> {
        let path = self.experiment_dir(experiment_id).join("metadata.json");
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Recover shadows from disk. Corrupt lines are skipped with a warning.
    pub fn load_shadow_executions(&self, experiment_id: &str) -> Result<Vec<ShadowExecution>> {
        let path = self.experiment_dir(experiment_id).join("shadows.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut shadows = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ShadowExecution>(&line) {
                Ok(shadow) => shadows.push(shadow),
                Err(e) => warn!(line = line_num + 1, error = %e, "skipping corrupt shadow line"),
            }
        }
        Ok(shadows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::types::{InterventionType, PolicyDomain, PolicyIntervention};
    use serde_json::json;

    fn sample_experiment(name: &str) -> PolicyExperiment {
        let intervention = PolicyIntervention::new(
            PolicyDomain::Temperature,
            InterventionType::ParameterChange,
            "temperature_cap",
            json!(0.8),
            json!(0.7),
        );
        PolicyExperiment::new(name, intervention)
    }

    #[test]
    fn test_register_start_end_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path()).unwrap();

        let experiment = sample_experiment("exp-a");
        let id = experiment.experiment_id.clone();
        registry.register_experiment(experiment).unwrap();
        assert!(registry.get_active_experiments().is_empty());

        registry.start_experiment(&id).unwrap();
        assert_eq!(registry.get_active_experiments().len(), 1);

        registry.end_experiment(&id).unwrap();
        assert!(registry.get_active_experiments().is_empty());
        assert!(registry.get_experiment(&id).unwrap().is_complete());
    }

    #[test]
    fn test_shadow_write_rejected_after_end() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path()).unwrap();

        let experiment = sample_experiment("exp-b");
        let id = experiment.experiment_id.clone();
        registry.register_experiment(experiment).unwrap();
        registry.start_experiment(&id).unwrap();

        registry
            .record_shadow_execution(&id, ShadowExecution::new("ep-1"))
            .unwrap();

        registry.end_experiment(&id).unwrap();
        let rejected = registry.record_shadow_execution(&id, ShadowExecution::new("ep-2"));
        assert!(matches!(rejected, Err(Error::ExperimentEnded(_))));
        assert_eq!(registry.get_shadow_executions(&id).len(), 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path()).unwrap();

        let experiment = sample_experiment("exp-c");
        let id = experiment.experiment_id.clone();
        registry.register_experiment(experiment.clone()).unwrap();
        registry.start_experiment(&id).unwrap();

        let mut shadow = ShadowExecution::new("ep-1");
        shadow.validation_regime_identical = true;
        shadow.compute_deltas();
        registry.record_shadow_execution(&id, shadow.clone()).unwrap();

        let loaded = registry.load_experiment(&id).unwrap();
        assert_eq!(loaded.experiment_id, id);
        assert!(loaded.started_at.is_some());

        let shadows = registry.load_shadow_executions(&id).unwrap();
        assert_eq!(shadows, vec![shadow]);
    }

    #[test]
    fn test_active_selection_is_registration_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path()).unwrap();

        let first = sample_experiment("first");
        let second = sample_experiment("second");
        let first_id = first.experiment_id.clone();
        registry.register_experiment(first).unwrap();
        registry.register_experiment(second.clone()).unwrap();
        registry.start_experiment(&first_id).unwrap();
        registry.start_experiment(&second.experiment_id).unwrap();

        let active = registry.get_active_experiments();
        assert_eq!(active[0].experiment_id, first_id);
    }

    #[test]
    fn test_unknown_experiment_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExperimentRegistry::open(dir.path()).unwrap();
        let result = registry.record_shadow_execution("missing", ShadowExecution::new("ep"));
        assert!(matches!(result, Err(Error::ExperimentNotFound(_))));
    }
}
