//! Probabilistic mode detector.
//!
//! Multinomial naive Bayes over query tokens with Laplace smoothing,
//! learning online from episode history. Falls back to keyword heuristics
//! until enough examples accumulate, and can blend both. Replaces brittle
//! keyword-only matching with calibrated classification.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Execution modes a query can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Math,
    Build,
    Chemistry,
    Biology,
    Unknown,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Math,
        Mode::Build,
        Mode::Chemistry,
        Mode::Biology,
        Mode::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Build => "build",
            Self::Chemistry => "chemistry",
            Self::Biology => "biology",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Mode {
        match s {
            "math" => Self::Math,
            "build" => Self::Build,
            "chemistry" => Self::Chemistry,
            "biology" => Self::Biology,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a classification was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Bayes,
    Heuristic,
    Hybrid,
}

/// Result of classifying a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub mode: Mode,
    pub confidence: f64,
    pub probabilities: HashMap<Mode, f64>,
    pub method: ClassificationMethod,
    pub features_used: Vec<String>,
}

/// A single training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub query: String,
    pub mode: Mode,
    pub success: bool,
    pub weight: f64,
}

impl TrainingExample {
    pub fn new(query: impl Into<String>, mode: Mode) -> Self {
        Self {
            query: query.into(),
            mode,
            success: true,
            weight: 1.0,
        }
    }
}

fn keyword_sets() -> HashMap<Mode, HashSet<&'static str>> {
    let math = [
        "solve", "equation", "integrate", "derivative", "matrix", "vector", "calculate",
        "compute", "simplify", "factor", "polynomial", "quadratic", "linear", "algebra",
        "calculus", "limit", "sum", "product", "series", "sequence", "proof", "theorem",
        "formula", "expression", "variable", "function", "graph", "plot", "root", "zero",
        "solution", "eigenvalue", "determinant", "inverse", "transpose", "gradient",
        "hessian", "integral", "differentiate", "taylor", "fourier", "laplace",
    ];
    let build = [
        "create", "build", "generate", "scaffold", "implement", "refactor", "test", "fix",
        "debug", "deploy", "setup", "configure", "install", "project", "file", "folder",
        "directory", "code", "script", "function", "class", "module", "package", "api",
        "endpoint", "server",
    ];
    let chemistry = [
        "molecule", "compound", "reaction", "element", "atom", "bond", "orbital",
        "electron", "proton", "neutron", "acid", "base", "molar", "concentration",
        "solution", "precipitate", "catalyst", "enzyme", "protein", "synthesis",
    ];
    let biology = [
        "cell", "gene", "dna", "rna", "protein", "enzyme", "organism", "species",
        "evolution", "mutation", "genome", "chromosome", "mitosis", "meiosis",
        "photosynthesis", "respiration", "metabolism", "anatomy", "physiology",
    ];

    let mut sets = HashMap::new();
    sets.insert(Mode::Math, math.into_iter().collect());
    sets.insert(Mode::Build, build.into_iter().collect());
    sets.insert(Mode::Chemistry, chemistry.into_iter().collect());
    sets.insert(Mode::Biology, biology.into_iter().collect());
    sets
}

/// Serialized detector state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DetectorState {
    mode_counts: HashMap<Mode, f64>,
    word_counts: HashMap<Mode, HashMap<String, f64>>,
    mode_word_totals: HashMap<Mode, f64>,
    vocabulary: Vec<String>,
    total_examples: f64,
    alpha: f64,
    fitted: bool,
}

/// Naive-Bayes mode classifier with online learning.
pub struct ProbabilisticDetector {
    mode_counts: HashMap<Mode, f64>,
    word_counts: HashMap<Mode, HashMap<String, f64>>,
    mode_word_totals: HashMap<Mode, f64>,
    vocabulary: HashSet<String>,
    total_examples: f64,
    /// Laplace smoothing parameter
    alpha: f64,
    min_examples: f64,
    fitted: bool,
    tokenizer: Regex,
}

impl Default for ProbabilisticDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbabilisticDetector {
    pub fn new() -> Self {
        Self {
            mode_counts: HashMap::new(),
            word_counts: HashMap::new(),
            mode_word_totals: HashMap::new(),
            vocabulary: HashSet::new(),
            total_examples: 0.0,
            alpha: 1.0,
            min_examples: 5.0,
            fitted: false,
            tokenizer: Regex::new(r"[a-z]+").expect("static tokenizer regex"),
        }
    }

    /// Whether the classifier has enough data to trust its model.
    pub fn is_fitted(&self) -> bool {
        self.fitted && self.total_examples >= self.min_examples
    }

    /// Train from scratch on a batch of examples.
    pub fn fit(&mut self, examples: &[TrainingExample]) {
        self.mode_counts.clear();
        self.word_counts.clear();
        self.mode_word_totals.clear();
        self.vocabulary.clear();
        self.total_examples = 0.0;

        for example in examples {
            self.add_weighted(&example.query, example.mode, example.success, example.weight);
        }
        self.fitted = true;
    }

    /// Online update with a single example. Unsuccessful classifications
    /// count at half weight.
    pub fn add_example(&mut self, query: &str, mode: Mode, success: bool, weight: f64) {
        self.add_weighted(query, mode, success, weight);
        self.fitted = true;
    }

    fn add_weighted(&mut self, query: &str, mode: Mode, success: bool, weight: f64) {
        let effective = weight * if success { 1.0 } else { 0.5 };
        let words = self.tokenize(query);

        *self.mode_counts.entry(mode).or_insert(0.0) += effective;
        self.total_examples += effective;

        let counts = self.word_counts.entry(mode).or_default();
        for word in words {
            *counts.entry(word.clone()).or_insert(0.0) += effective;
            *self.mode_word_totals.entry(mode).or_insert(0.0) += effective;
            self.vocabulary.insert(word);
        }
    }

    /// Classify with the Bayesian model if fitted, keyword heuristics
    /// otherwise.
    pub fn classify(&self, query: &str) -> ClassificationResult {
        if self.is_fitted() {
            self.classify_bayes(query)
        } else {
            self.classify_heuristic(query)
        }
    }

    /// Blend Bayesian and heuristic probabilities, weighting the model by
    /// how much it has seen.
    pub fn classify_hybrid(&self, query: &str) -> ClassificationResult {
        let heuristic = self.classify_heuristic(query);
        if !self.is_fitted() {
            return heuristic;
        }
        let bayes = self.classify_bayes(query);

        let bayes_weight = (self.total_examples / 100.0).min(0.8);
        let heuristic_weight = 1.0 - bayes_weight;

        let mut combined: HashMap<Mode, f64> = HashMap::new();
        for mode in Mode::ALL {
            let b = bayes.probabilities.get(&mode).copied().unwrap_or(0.0);
            let h = heuristic.probabilities.get(&mode).copied().unwrap_or(0.0);
            combined.insert(mode, bayes_weight * b + heuristic_weight * h);
        }
        let total: f64 = combined.values().sum();
        if total > 0.0 {
            for value in combined.values_mut() {
                *value /= total;
            }
        }

        let (best, confidence) = best_mode(&combined);
        let mut features = bayes.features_used;
        features.push("heuristic_keywords".to_string());

        ClassificationResult {
            mode: best,
            confidence,
            probabilities: combined,
            method: ClassificationMethod::Hybrid,
            features_used: features,
        }
    }

    fn classify_bayes(&self, query: &str) -> ClassificationResult {
        let words = self.tokenize(query);
        let vocab_size = self.vocabulary.len().max(1) as f64;

        let mut log_probs: HashMap<Mode, f64> = HashMap::new();
        let mut features = Vec::new();

        for mode in Mode::ALL {
            let mode_count = self.mode_counts.get(&mode).copied().unwrap_or(0.0);
            let prior = (mode_count + self.alpha)
                / (self.total_examples + self.alpha * Mode::ALL.len() as f64);
            let mut log_prob = prior.ln();

            let mode_total =
                self.mode_word_totals.get(&mode).copied().unwrap_or(0.0) + self.alpha * vocab_size;
            let counts = self.word_counts.get(&mode);

            for word in &words {
                let count = counts
                    .and_then(|c| c.get(word))
                    .copied()
                    .unwrap_or(0.0)
                    + self.alpha;
                log_prob += (count / mode_total).ln();

                if self.vocabulary.contains(word) {
                    features.push(word.clone());
                }
            }
            log_probs.insert(mode, log_prob);
        }

        // Softmax over log probabilities.
        let max_log = log_probs.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut probs: HashMap<Mode, f64> = log_probs
            .into_iter()
            .map(|(mode, lp)| (mode, (lp - max_log).exp()))
            .collect();
        let total: f64 = probs.values().sum();
        for value in probs.values_mut() {
            *value /= total;
        }

        let (best, confidence) = best_mode(&probs);
        features.sort();
        features.dedup();
        features.truncate(10);

        debug!(mode = %best, confidence, "bayes classification");

        ClassificationResult {
            mode: best,
            confidence,
            probabilities: probs,
            method: ClassificationMethod::Bayes,
            features_used: features,
        }
    }

    fn classify_heuristic(&self, query: &str) -> ClassificationResult {
        let words: HashSet<String> = self.tokenize(query).into_iter().collect();
        let keywords = keyword_sets();

        let mut scores: HashMap<Mode, f64> = HashMap::new();
        let mut features = Vec::new();

        for (mode, set) in &keywords {
            let matches: Vec<&String> = words.iter().filter(|w| set.contains(w.as_str())).collect();
            scores.insert(*mode, matches.len() as f64);
            features.extend(matches.into_iter().cloned());
        }
        // Small floor so a no-match query lands on unknown.
        scores.insert(Mode::Unknown, 0.1);

        let total: f64 = scores.values().sum();
        let probs: HashMap<Mode, f64> = scores
            .iter()
            .map(|(mode, score)| (*mode, score / total))
            .collect();

        let (best, mut confidence) = best_mode(&probs);
        let best_score = scores.get(&best).copied().unwrap_or(0.0);
        if best_score == 0.0 {
            confidence = 0.2;
        } else if best_score < 2.0 {
            confidence = confidence.min(0.5);
        }

        features.sort();
        features.dedup();

        ClassificationResult {
            mode: best,
            confidence,
            probabilities: probs,
            method: ClassificationMethod::Heuristic,
            features_used: features,
        }
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.tokenizer
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|w| w.len() > 2)
            .collect()
    }

    /// Save model state as a plain JSON record.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = DetectorState {
            mode_counts: self.mode_counts.clone(),
            word_counts: self.word_counts.clone(),
            mode_word_totals: self.mode_word_totals.clone(),
            vocabulary: self.vocabulary.iter().cloned().collect(),
            total_examples: self.total_examples,
            alpha: self.alpha,
            fitted: self.fitted,
        };
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load model state from a JSON record.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let state: DetectorState = serde_json::from_str(&json)?;
        let mut detector = Self::new();
        detector.mode_counts = state.mode_counts;
        detector.word_counts = state.word_counts;
        detector.mode_word_totals = state.mode_word_totals;
        detector.vocabulary = state.vocabulary.into_iter().collect();
        detector.total_examples = state.total_examples;
        detector.alpha = state.alpha;
        detector.fitted = state.fitted;
        Ok(detector)
    }

    /// Training statistics for introspection.
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            total_examples: self.total_examples,
            vocabulary_size: self.vocabulary.len(),
            mode_distribution: self.mode_counts.clone(),
            is_fitted: self.is_fitted(),
        }
    }

    /// A detector pre-trained on a small seed corpus, usable before any
    /// episode history exists.
    pub fn pretrained() -> Self {
        let mut detector = Self::new();
        let math = [
            "solve x^2 - 4 = 0",
            "integrate sin(x) dx",
            "find the derivative of x^3",
            "calculate the determinant of matrix A",
            "simplify (x+1)^2",
            "factor x^2 - 5x + 6",
            "find eigenvalues of [[1,2],[3,4]]",
            "compute gradient of f(x,y) = x^2 + y^2",
            "solve the system 2x + y = 5, x - y = 1",
            "evaluate the limit of (x^2-1)/(x-1) as x->1",
            "find the taylor series of e^x",
            "compute the fourier transform",
        ];
        let build = [
            "create a new python project",
            "scaffold a react app",
            "generate a REST API",
            "implement user authentication",
            "refactor the database module",
            "fix the bug in login.py",
            "add tests for the parser",
            "deploy to production",
            "setup docker container",
            "create a CLI tool",
        ];
        let chemistry = [
            "balance the equation H2 + O2 -> H2O",
            "calculate the molar mass of NaCl",
            "what is the pH of 0.1M HCl",
            "draw the lewis structure of CO2",
            "explain sp3 hybridization",
        ];
        let biology = [
            "explain DNA replication",
            "what is the krebs cycle",
            "describe mitosis phases",
            "how does photosynthesis work",
            "explain protein synthesis",
        ];

        for query in math {
            detector.add_example(query, Mode::Math, true, 1.0);
        }
        for query in build {
            detector.add_example(query, Mode::Build, true, 1.0);
        }
        for query in chemistry {
            detector.add_example(query, Mode::Chemistry, true, 1.0);
        }
        for query in biology {
            detector.add_example(query, Mode::Biology, true, 1.0);
        }
        detector
    }
}

/// Detector training statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStats {
    pub total_examples: f64,
    pub vocabulary_size: usize,
    pub mode_distribution: HashMap<Mode, f64>,
    pub is_fitted: bool,
}

/// Train a detector from episode history. Episodes are weak supervision:
/// the mode that ran is the label, and whether it succeeded sets the
/// weight.
pub fn train_from_episodes(episodes: &[crate::orchestrator::Episode]) -> ProbabilisticDetector {
    let examples: Vec<TrainingExample> = episodes
        .iter()
        .filter(|e| !e.query.is_empty())
        .map(|e| TrainingExample {
            query: e.query.clone(),
            mode: e.mode,
            success: e.result.as_ref().map(|r| r.success).unwrap_or(true),
            weight: 1.0,
        })
        .collect();

    let mut detector = ProbabilisticDetector::new();
    detector.fit(&examples);
    detector
}

fn best_mode(probs: &HashMap<Mode, f64>) -> (Mode, f64) {
    let mut best = Mode::Unknown;
    let mut best_prob = f64::NEG_INFINITY;
    // Iterate in fixed order so ties resolve deterministically.
    for mode in Mode::ALL {
        let p = probs.get(&mode).copied().unwrap_or(0.0);
        if p > best_prob {
            best = mode;
            best_prob = p;
        }
    }
    (best, best_prob)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_fallback_when_unfitted() {
        let detector = ProbabilisticDetector::new();
        let result = detector.classify("solve the quadratic equation x^2 - 4 = 0");
        assert_eq!(result.method, ClassificationMethod::Heuristic);
        assert_eq!(result.mode, Mode::Math);
    }

    #[test]
    fn test_no_match_lands_on_unknown() {
        let detector = ProbabilisticDetector::new();
        let result = detector.classify("zzz qqq www");
        assert_eq!(result.mode, Mode::Unknown);
        assert!(result.confidence <= 0.2 + 1e-9);
    }

    #[test]
    fn test_bayes_after_training() {
        let detector = ProbabilisticDetector::pretrained();
        assert!(detector.is_fitted());

        let result = detector.classify("integrate the function cos(x)");
        assert_eq!(result.method, ClassificationMethod::Bayes);
        assert_eq!(result.mode, Mode::Math);

        let result = detector.classify("scaffold a new api project with tests");
        assert_eq!(result.mode, Mode::Build);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let detector = ProbabilisticDetector::pretrained();
        let result = detector.classify("solve for x");
        let total: f64 = result.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsuccessful_examples_half_weight() {
        let mut a = ProbabilisticDetector::new();
        let mut b = ProbabilisticDetector::new();
        a.add_example("solve equation", Mode::Math, true, 1.0);
        b.add_example("solve equation", Mode::Math, false, 1.0);
        assert!((a.stats().total_examples - 1.0).abs() < 1e-9);
        assert!((b.stats().total_examples - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_hybrid_blends_and_normalizes() {
        let detector = ProbabilisticDetector::pretrained();
        let result = detector.classify_hybrid("solve the equation");
        assert_eq!(result.method, ClassificationMethod::Hybrid);
        let total: f64 = result.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_train_from_episodes() {
        use crate::orchestrator::{Episode, EpisodeOutcome};

        let mut episodes = Vec::new();
        for query in ["solve x^2 = 9", "integrate x dx", "find the derivative of x^4"] {
            let mut episode = Episode::begin(query, Mode::Math);
            episode.result = Some(EpisodeOutcome {
                success: true,
                final_answer: None,
                errors: vec![],
                cost: 0.0,
            });
            episode.finalize();
            episodes.push(episode);
        }
        for query in ["scaffold a project", "deploy the api server", "fix the login bug"] {
            let mut episode = Episode::begin(query, Mode::Build);
            episode.finalize();
            episodes.push(episode);
        }

        let detector = train_from_episodes(&episodes);
        assert!(detector.is_fitted());
        assert_eq!(detector.classify("solve the quadratic equation").mode, Mode::Math);
    }

    #[test]
    fn test_save_load_same_probabilities() {
        let detector = ProbabilisticDetector::pretrained();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.json");
        detector.save(&path).unwrap();

        let loaded = ProbabilisticDetector::load(&path).unwrap();
        let query = "find the derivative of sin(x) * x^2";
        let before = detector.classify(query);
        let after = loaded.classify(query);

        assert_eq!(before.mode, after.mode);
        for mode in Mode::ALL {
            let a = before.probabilities.get(&mode).copied().unwrap_or(0.0);
            let b = after.probabilities.get(&mode).copied().unwrap_or(0.0);
            assert!((a - b).abs() < 1e-12);
        }
    }
}
