//! Episode records and the append-only episode log.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::types::{IncompletenessAssessment, ValidationReport, WorldImpactAssessment};
use crate::detector::Mode;
use crate::error::{ModeError, Result};

/// Causal metadata linking an episode to at most one experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_treatment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propensity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stratification_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_impact_category: Option<String>,
}

/// Typed result summary carried on the episode record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<ModeError>,
    pub cost: f64,
}

/// One user query's lifecycle. Mutated only by the orchestrator until
/// finalized; never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub query: String,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: f64,
    pub result: Option<EpisodeOutcome>,
    pub validation: Option<ValidationReport>,
    pub world_impact: WorldImpactAssessment,
    pub incompleteness: IncompletenessAssessment,
    pub trust_score: f64,
    #[serde(default)]
    pub metadata: EpisodeMetadata,
}

impl Episode {
    pub fn begin(query: impl Into<String>, mode: Mode) -> Self {
        Self {
            episode_id: Uuid::new_v4().to_string(),
            query: query.into(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0.0,
            result: None,
            validation: None,
            world_impact: WorldImpactAssessment::default(),
            incompleteness: IncompletenessAssessment::default(),
            trust_score: 0.0,
            metadata: EpisodeMetadata::default(),
        }
    }

    pub fn finalize(&mut self) {
        let now = Utc::now();
        self.duration_ms = (now - self.started_at).num_milliseconds() as f64;
        self.finished_at = Some(now);
    }
}

/// Append-only newline-delimited JSON episode log, one episode per line.
pub struct EpisodeLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EpisodeLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a finalized episode.
    pub fn append(&self, episode: &Episode) -> Result<()> {
        let _guard = self.write_lock.lock().expect("episode log lock poisoned");
        let mut line = serde_json::to_string(episode)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Read every parseable episode; malformed lines are logged and
    /// skipped.
    pub fn read_all(&self) -> Result<Vec<Episode>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut episodes = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Episode>(&line) {
                Ok(episode) => episodes.push(episode),
                Err(e) => warn!(line = line_num + 1, error = %e, "skipping corrupt episode line"),
            }
        }
        Ok(episodes)
    }

    /// Episodes whose metadata references the experiment.
    pub fn read_for_experiment(&self, experiment_id: &str) -> Result<Vec<Episode>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.metadata.experiment_id.as_deref() == Some(experiment_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = EpisodeLog::open(dir.path().join("episodes.jsonl")).unwrap();

        let mut episode = Episode::begin("solve x", Mode::Math);
        episode.metadata.experiment_id = Some("exp-1".into());
        episode.finalize();
        log.append(&episode).unwrap();

        let mut other = Episode::begin("build api", Mode::Build);
        other.finalize();
        log.append(&other).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);

        let for_exp = log.read_for_experiment("exp-1").unwrap();
        assert_eq!(for_exp.len(), 1);
        assert_eq!(for_exp[0].query, "solve x");
    }

    #[test]
    fn test_finalize_sets_duration() {
        let mut episode = Episode::begin("q", Mode::Unknown);
        episode.finalize();
        assert!(episode.finished_at.is_some());
        assert!(episode.duration_ms >= 0.0);
    }
}
