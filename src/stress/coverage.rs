//! Stress test coverage tracking.
//!
//! The tracker persists scenarios, test runs, and coverage gaps behind
//! the [`CoverageStore`] trait. The default store is SQLite; an in-memory
//! implementation exists for tests and ephemeral analysis. `record_run`
//! updates the parent scenario's rolling aggregates in the same
//! transaction as the run insert.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::capability::ToleranceConfig;
use crate::error::{Error, Result};

/// One recorded stress test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunRecord {
    pub run_id: String,
    pub scenario_id: String,
    pub case_id: String,
    pub budget_tier: String,
    pub tolerance_config: ToleranceConfig,
    pub passed: bool,
    pub confidence: f64,
    pub duration_ms: f64,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub timestamp: String,
}

impl TestRunRecord {
    pub fn new(scenario_id: impl Into<String>, case_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            scenario_id: scenario_id.into(),
            case_id: case_id.into(),
            budget_tier: "standard".to_string(),
            tolerance_config: ToleranceConfig::default(),
            passed: false,
            confidence: 0.0,
            duration_ms: 0.0,
            outcome: String::new(),
            failure_reason: None,
            warnings: Vec::new(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Rolling statistics for one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub total_runs: u32,
    pub passed_runs: u32,
    pub avg_confidence: f64,
    pub last_run_at: Option<String>,
}

impl ScenarioStats {
    pub fn failure_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 1.0;
        }
        1.0 - self.passed_runs as f64 / self.total_runs as f64
    }
}

impl Default for ScenarioStats {
    fn default() -> Self {
        Self {
            total_runs: 0,
            passed_runs: 0,
            avg_confidence: 0.0,
            last_run_at: None,
        }
    }
}

/// Kind of coverage gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    Untested,
    LowConfidence,
    HighFailureRate,
}

impl GapType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Untested => "untested",
            Self::LowConfidence => "low_confidence",
            Self::HighFailureRate => "high_failure_rate",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "untested" => Some(Self::Untested),
            "low_confidence" => Some(Self::LowConfidence),
            "high_failure_rate" => Some(Self::HighFailureRate),
            _ => None,
        }
    }
}

/// A coverage gap identified from test results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub gap_id: String,
    pub scenario_id: String,
    pub gap_type: GapType,
    pub description: String,
    /// 1-5, higher is more urgent
    pub priority: u8,
    pub discovered_at: String,
    pub resolved_at: Option<String>,
}

impl CoverageGap {
    pub fn new(scenario_id: impl Into<String>, gap_type: GapType, description: impl Into<String>, priority: u8) -> Self {
        Self {
            gap_id: Uuid::new_v4().to_string(),
            scenario_id: scenario_id.into(),
            gap_type,
            description: description.into(),
            priority: priority.clamp(1, 5),
            discovered_at: Utc::now().to_rfc3339(),
            resolved_at: None,
        }
    }
}

/// Summary row for one scenario in a coverage report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub scenario_id: String,
    pub name: String,
    pub category: String,
    pub domain: String,
    pub stats: ScenarioStats,
}

/// Storage interface for coverage data.
pub trait CoverageStore: Send + Sync {
    fn record_scenario(
        &self,
        scenario_id: &str,
        name: &str,
        category: &str,
        domain: &str,
    ) -> Result<()>;
    fn record_run(&self, run: &TestRunRecord) -> Result<()>;
    fn scenario_stats(&self, scenario_id: &str) -> Result<ScenarioStats>;
    fn all_scenarios(&self) -> Result<Vec<ScenarioSummary>>;
    fn record_gap(&self, gap: &CoverageGap) -> Result<()>;
    fn unresolved_gaps(&self, priority_min: u8) -> Result<Vec<CoverageGap>>;
    fn resolve_gap(&self, gap_id: &str) -> Result<()>;
}

/// SQLite-backed coverage store.
pub struct SqliteCoverageStore {
    conn: Mutex<Connection>,
}

impl SqliteCoverageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scenarios (
                scenario_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT,
                domain TEXT,
                total_runs INTEGER DEFAULT 0,
                passed_runs INTEGER DEFAULT 0,
                avg_confidence REAL DEFAULT 0.0,
                last_run_at TEXT,
                created_at TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS test_runs (
                run_id TEXT PRIMARY KEY,
                scenario_id TEXT NOT NULL,
                case_id TEXT NOT NULL,
                budget_tier TEXT,
                tolerance_config TEXT,
                passed BOOLEAN,
                confidence REAL,
                duration_ms REAL,
                outcome TEXT,
                failure_reason TEXT,
                warnings TEXT,
                timestamp TEXT,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(scenario_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS coverage_gaps (
                gap_id TEXT PRIMARY KEY,
                scenario_id TEXT NOT NULL,
                gap_type TEXT,
                description TEXT,
                priority INTEGER,
                discovered_at TEXT,
                resolved_at TEXT,
                FOREIGN KEY (scenario_id) REFERENCES scenarios(scenario_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_scenario ON test_runs(scenario_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON test_runs(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_gaps_scenario ON coverage_gaps(scenario_id)",
            [],
        )?;
        Ok(())
    }
}

impl CoverageStore for SqliteCoverageStore {
    fn record_scenario(
        &self,
        scenario_id: &str,
        name: &str,
        category: &str,
        domain: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        conn.execute(
            "INSERT INTO scenarios (scenario_id, name, category, domain, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(scenario_id) DO UPDATE SET
                 name = excluded.name,
                 category = excluded.category,
                 domain = excluded.domain",
            params![scenario_id, name, category, domain, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_run(&self, run: &TestRunRecord) -> Result<()> {
        let mut conn = self.conn.lock().expect("coverage store lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO test_runs
             (run_id, scenario_id, case_id, budget_tier, tolerance_config,
              passed, confidence, duration_ms, outcome, failure_reason, warnings, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.run_id,
                run.scenario_id,
                run.case_id,
                run.budget_tier,
                serde_json::to_string(&run.tolerance_config)?,
                run.passed,
                run.confidence,
                run.duration_ms,
                run.outcome,
                run.failure_reason,
                serde_json::to_string(&run.warnings)?,
                run.timestamp,
            ],
        )?;
        // Rolling aggregates on the parent row, same transaction.
        tx.execute(
            "UPDATE scenarios SET
                 total_runs = (SELECT COUNT(*) FROM test_runs WHERE scenario_id = ?1),
                 passed_runs = (SELECT COALESCE(SUM(CAST(passed AS INT)), 0)
                                FROM test_runs WHERE scenario_id = ?1),
                 avg_confidence = (SELECT COALESCE(AVG(confidence), 0.0)
                                   FROM test_runs WHERE scenario_id = ?1),
                 last_run_at = ?2
             WHERE scenario_id = ?1",
            params![run.scenario_id, run.timestamp],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn scenario_stats(&self, scenario_id: &str) -> Result<ScenarioStats> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT total_runs, passed_runs, avg_confidence, last_run_at
             FROM scenarios WHERE scenario_id = ?1",
        )?;
        let mut rows = stmt.query(params![scenario_id])?;
        match rows.next()? {
            Some(row) => Ok(ScenarioStats {
                total_runs: row.get::<_, Option<u32>>(0)?.unwrap_or(0),
                passed_runs: row.get::<_, Option<u32>>(1)?.unwrap_or(0),
                avg_confidence: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                last_run_at: row.get(3)?,
            }),
            None => Ok(ScenarioStats::default()),
        }
    }

    fn all_scenarios(&self) -> Result<Vec<ScenarioSummary>> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT scenario_id, name, category, domain, total_runs, passed_runs,
                    avg_confidence, last_run_at
             FROM scenarios ORDER BY category, domain, name",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(ScenarioSummary {
                    scenario_id: row.get(0)?,
                    name: row.get(1)?,
                    category: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    domain: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    stats: ScenarioStats {
                        total_runs: row.get::<_, Option<u32>>(4)?.unwrap_or(0),
                        passed_runs: row.get::<_, Option<u32>>(5)?.unwrap_or(0),
                        avg_confidence: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
                        last_run_at: row.get(7)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn record_gap(&self, gap: &CoverageGap) -> Result<()> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO coverage_gaps
             (gap_id, scenario_id, gap_type, description, priority, discovered_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                gap.gap_id,
                gap.scenario_id,
                gap.gap_type.as_str(),
                gap.description,
                gap.priority,
                gap.discovered_at,
                gap.resolved_at,
            ],
        )?;
        Ok(())
    }

    fn unresolved_gaps(&self, priority_min: u8) -> Result<Vec<CoverageGap>> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT gap_id, scenario_id, gap_type, description, priority, discovered_at, resolved_at
             FROM coverage_gaps
             WHERE resolved_at IS NULL AND priority >= ?1
             ORDER BY priority DESC, discovered_at ASC",
        )?;
        let gaps = stmt
            .query_map(params![priority_min], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u8>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(gaps
            .into_iter()
            .filter_map(
                |(gap_id, scenario_id, gap_type, description, priority, discovered_at, resolved_at)| {
                    Some(CoverageGap {
                        gap_id,
                        scenario_id,
                        gap_type: GapType::parse(&gap_type)?,
                        description,
                        priority,
                        discovered_at,
                        resolved_at,
                    })
                },
            )
            .collect())
    }

    fn resolve_gap(&self, gap_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("coverage store lock poisoned");
        conn.execute(
            "UPDATE coverage_gaps SET resolved_at = ?1 WHERE gap_id = ?2",
            params![Utc::now().to_rfc3339(), gap_id],
        )?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    scenarios: HashMap<String, ScenarioSummary>,
    runs: Vec<TestRunRecord>,
    gaps: HashMap<String, CoverageGap>,
    order: Vec<String>,
}

/// In-memory coverage store for tests.
#[derive(Default)]
pub struct MemoryCoverageStore {
    state: Mutex<MemoryState>,
}

impl MemoryCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoverageStore for MemoryCoverageStore {
    fn record_scenario(
        &self,
        scenario_id: &str,
        name: &str,
        category: &str,
        domain: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        if !state.scenarios.contains_key(scenario_id) {
            state.order.push(scenario_id.to_string());
        }
        let stats = state
            .scenarios
            .get(scenario_id)
            .map(|s| s.stats.clone())
            .unwrap_or_default();
        state.scenarios.insert(
            scenario_id.to_string(),
            ScenarioSummary {
                scenario_id: scenario_id.to_string(),
                name: name.to_string(),
                category: category.to_string(),
                domain: domain.to_string(),
                stats,
            },
        );
        Ok(())
    }

    fn record_run(&self, run: &TestRunRecord) -> Result<()> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state.runs.push(run.clone());

        let runs: Vec<&TestRunRecord> = state
            .runs
            .iter()
            .filter(|r| r.scenario_id == run.scenario_id)
            .collect();
        let total = runs.len() as u32;
        let passed = runs.iter().filter(|r| r.passed).count() as u32;
        let avg = runs.iter().map(|r| r.confidence).sum::<f64>() / total.max(1) as f64;
        let stats = ScenarioStats {
            total_runs: total,
            passed_runs: passed,
            avg_confidence: avg,
            last_run_at: Some(run.timestamp.clone()),
        };

        let summary = state
            .scenarios
            .entry(run.scenario_id.clone())
            .or_insert_with(|| ScenarioSummary {
                scenario_id: run.scenario_id.clone(),
                name: run.scenario_id.clone(),
                category: String::new(),
                domain: String::new(),
                stats: ScenarioStats::default(),
            });
        summary.stats = stats;
        Ok(())
    }

    fn scenario_stats(&self, scenario_id: &str) -> Result<ScenarioStats> {
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(state
            .scenarios
            .get(scenario_id)
            .map(|s| s.stats.clone())
            .unwrap_or_default())
    }

    fn all_scenarios(&self) -> Result<Vec<ScenarioSummary>> {
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.scenarios.get(id).cloned())
            .collect())
    }

    fn record_gap(&self, gap: &CoverageGap) -> Result<()> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state.gaps.insert(gap.gap_id.clone(), gap.clone());
        Ok(())
    }

    fn unresolved_gaps(&self, priority_min: u8) -> Result<Vec<CoverageGap>> {
        let state = self.state.lock().expect("memory store lock poisoned");
        let mut gaps: Vec<CoverageGap> = state
            .gaps
            .values()
            .filter(|g| g.resolved_at.is_none() && g.priority >= priority_min)
            .cloned()
            .collect();
        gaps.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.discovered_at.cmp(&b.discovered_at))
        });
        Ok(gaps)
    }

    fn resolve_gap(&self, gap_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let gap = state
            .gaps
            .get_mut(gap_id)
            .ok_or_else(|| Error::coverage(format!("unknown gap {gap_id}")))?;
        gap.resolved_at = Some(Utc::now().to_rfc3339());
        Ok(())
    }
}

/// Aggregate coverage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub generated_at: String,
    pub total_scenarios: usize,
    pub total_runs: u32,
    pub total_passed: u32,
    pub overall_failure_rate: f64,
    pub avg_confidence: f64,
    pub scenarios: Vec<ScenarioSummary>,
    pub gaps: Vec<CoverageGap>,
    pub gap_counts_by_type: HashMap<String, usize>,
    pub high_priority_gaps: usize,
}

/// Coverage tracking over any [`CoverageStore`].
pub struct CoverageTracker {
    store: Box<dyn CoverageStore>,
}

impl CoverageTracker {
    pub fn new(store: impl CoverageStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// SQLite-backed tracker at the given path.
    pub fn sqlite(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SqliteCoverageStore::open(path)?))
    }

    /// In-memory tracker for tests.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteCoverageStore::in_memory()?))
    }

    pub fn store(&self) -> &dyn CoverageStore {
        self.store.as_ref()
    }

    pub fn record_scenario(
        &self,
        scenario_id: &str,
        name: &str,
        category: &str,
        domain: &str,
    ) -> Result<()> {
        self.store.record_scenario(scenario_id, name, category, domain)
    }

    pub fn record_run(&self, run: &TestRunRecord) -> Result<()> {
        self.store.record_run(run)
    }

    pub fn scenario_stats(&self, scenario_id: &str) -> Result<ScenarioStats> {
        self.store.scenario_stats(scenario_id)
    }

    pub fn record_gap(&self, gap: &CoverageGap) -> Result<()> {
        self.store.record_gap(gap)
    }

    pub fn unresolved_gaps(&self, priority_min: u8) -> Result<Vec<CoverageGap>> {
        self.store.unresolved_gaps(priority_min)
    }

    /// Scan all scenarios and record gaps for untested, low-confidence,
    /// and high-failure-rate ones. Returns the newly detected gaps.
    pub fn detect_gaps(&self) -> Result<Vec<CoverageGap>> {
        let mut detected = Vec::new();
        for scenario in self.store.all_scenarios()? {
            let stats = &scenario.stats;
            let gap = if stats.total_runs == 0 {
                Some(CoverageGap::new(
                    &scenario.scenario_id,
                    GapType::Untested,
                    format!("scenario '{}' has never run", scenario.name),
                    4,
                ))
            } else if stats.failure_rate() > 0.30 {
                Some(CoverageGap::new(
                    &scenario.scenario_id,
                    GapType::HighFailureRate,
                    format!(
                        "failure rate {:.0}% across {} runs",
                        stats.failure_rate() * 100.0,
                        stats.total_runs
                    ),
                    5,
                ))
            } else if stats.avg_confidence < 0.50 {
                Some(CoverageGap::new(
                    &scenario.scenario_id,
                    GapType::LowConfidence,
                    format!("average confidence {:.2} below 0.50", stats.avg_confidence),
                    3,
                ))
            } else {
                None
            };
            if let Some(gap) = gap {
                self.store.record_gap(&gap)?;
                detected.push(gap);
            }
        }
        Ok(detected)
    }

    /// Aggregate report over scenarios and unresolved gaps.
    pub fn coverage_report(&self) -> Result<CoverageReport> {
        let scenarios = self.store.all_scenarios()?;
        let gaps = self.store.unresolved_gaps(1)?;

        let total_runs: u32 = scenarios.iter().map(|s| s.stats.total_runs).sum();
        let total_passed: u32 = scenarios.iter().map(|s| s.stats.passed_runs).sum();
        let avg_confidence = if scenarios.is_empty() {
            0.0
        } else {
            scenarios.iter().map(|s| s.stats.avg_confidence).sum::<f64>() / scenarios.len() as f64
        };

        let mut gap_counts_by_type: HashMap<String, usize> = HashMap::new();
        for gap in &gaps {
            *gap_counts_by_type
                .entry(gap.gap_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let high_priority_gaps = gaps.iter().filter(|g| g.priority >= 4).count();

        let report = CoverageReport {
            generated_at: Utc::now().to_rfc3339(),
            total_scenarios: scenarios.len(),
            total_runs,
            total_passed,
            overall_failure_rate: if total_runs > 0 {
                1.0 - total_passed as f64 / total_runs as f64
            } else {
                1.0
            },
            avg_confidence,
            scenarios,
            gaps,
            gap_counts_by_type,
            high_priority_gaps,
        };
        info!(
            scenarios = report.total_scenarios,
            runs = report.total_runs,
            gaps = report.gaps.len(),
            "generated coverage report"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(scenario: &str, passed: bool, confidence: f64) -> TestRunRecord {
        let mut record = TestRunRecord::new(scenario, "case-1");
        record.passed = passed;
        record.confidence = confidence;
        record.outcome = if passed { "solved" } else { "failed" }.to_string();
        record
    }

    fn exercise_store(tracker: &CoverageTracker) {
        tracker
            .record_scenario("s1", "Scenario One", "edge_cases", "algebra")
            .unwrap();
        tracker.record_run(&run("s1", true, 0.9)).unwrap();
        tracker.record_run(&run("s1", false, 0.4)).unwrap();
        tracker.record_run(&run("s1", true, 0.8)).unwrap();

        let stats = tracker.scenario_stats("s1").unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.passed_runs, 2);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert!((stats.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert!(stats.last_run_at.is_some());
    }

    #[test]
    fn test_sqlite_store_aggregates() {
        let tracker = CoverageTracker::in_memory().unwrap();
        exercise_store(&tracker);
    }

    #[test]
    fn test_memory_store_aggregates() {
        let tracker = CoverageTracker::new(MemoryCoverageStore::new());
        exercise_store(&tracker);
    }

    #[test]
    fn test_sqlite_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = CoverageTracker::sqlite(dir.path().join("coverage.db")).unwrap();
        exercise_store(&tracker);
    }

    #[test]
    fn test_unknown_scenario_stats_default() {
        let tracker = CoverageTracker::in_memory().unwrap();
        let stats = tracker.scenario_stats("missing").unwrap();
        assert_eq!(stats.total_runs, 0);
        assert_eq!(stats.failure_rate(), 1.0);
    }

    #[test]
    fn test_gap_detection() {
        let tracker = CoverageTracker::in_memory().unwrap();
        tracker
            .record_scenario("untested", "Never Ran", "edge_cases", "algebra")
            .unwrap();
        tracker
            .record_scenario("flaky", "Flaky", "edge_cases", "algebra")
            .unwrap();
        for _ in 0..6 {
            tracker.record_run(&run("flaky", false, 0.3)).unwrap();
        }
        for _ in 0..4 {
            tracker.record_run(&run("flaky", true, 0.8)).unwrap();
        }

        let gaps = tracker.detect_gaps().unwrap();
        assert_eq!(gaps.len(), 2);
        let untested = gaps.iter().find(|g| g.scenario_id == "untested").unwrap();
        assert_eq!(untested.gap_type, GapType::Untested);
        let flaky = gaps.iter().find(|g| g.scenario_id == "flaky").unwrap();
        assert_eq!(flaky.gap_type, GapType::HighFailureRate);

        let unresolved = tracker.unresolved_gaps(1).unwrap();
        assert_eq!(unresolved.len(), 2);
        // Highest priority first.
        assert_eq!(unresolved[0].gap_type, GapType::HighFailureRate);

        tracker.store().resolve_gap(&unresolved[0].gap_id).unwrap();
        assert_eq!(tracker.unresolved_gaps(1).unwrap().len(), 1);
    }

    #[test]
    fn test_coverage_report() {
        let tracker = CoverageTracker::in_memory().unwrap();
        tracker
            .record_scenario("s1", "One", "edge_cases", "algebra")
            .unwrap();
        tracker.record_run(&run("s1", true, 0.9)).unwrap();

        let report = tracker.coverage_report().unwrap();
        assert_eq!(report.total_scenarios, 1);
        assert_eq!(report.total_runs, 1);
        assert_eq!(report.total_passed, 1);
        assert!(report.overall_failure_rate.abs() < 1e-9);
    }
}
