//! Append-only hash-chained JSONL receipt store.
//!
//! Every appended receipt is linked to its predecessor by `parent_hash`
//! and assigned a globally monotonic `sequence_number`. Appends are
//! serialized by a single writer lock and are atomic at line granularity:
//! either one newline-terminated record lands or the call fails. A partial
//! line from a crashed process reads back as corruption and is surfaced by
//! `verify_integrity`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{compute_receipt_hash, Receipt, ReceiptBody, ReceiptWithHash};
use crate::error::{Error, Result};
use crate::experiment::{InterventionType, PolicyDomain};

struct ChainState {
    last_hash: Option<String>,
    sequence: u64,
}

/// Thread-safe append-only JSONL storage for receipts.
pub struct ReceiptStore {
    path: PathBuf,
    state: Mutex<ChainState>,
}

/// Predicate combination for [`ReceiptStore::filter`].
#[derive(Debug, Clone, Default)]
pub struct ReceiptFilter {
    pub experiment_id: Option<String>,
    pub domain: Option<PolicyDomain>,
    pub intervention_type: Option<InterventionType>,
    pub promoted: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Outcome of an integrity scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Empty,
    Valid,
    Invalid,
}

/// A record whose stored hash does not match its recomputed body hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TamperedReceipt {
    pub position: usize,
    pub sequence_number: u64,
    pub stored_hash: String,
    pub computed_hash: String,
}

/// A record whose parent hash does not match its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub position: usize,
    pub expected_parent: String,
    pub actual_parent: Option<String>,
}

/// Integrity report over the stored bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub total_receipts: usize,
    pub hash_chain_valid: bool,
    pub tampered_receipts: Vec<TamperedReceipt>,
    pub chain_breaks: Vec<ChainBreak>,
}

impl ReceiptStore {
    /// Open (or create) a receipt store at `path`.
    ///
    /// Seeks the final non-empty line to reinitialize the last-hash cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut state = ChainState {
            last_hash: None,
            sequence: 0,
        };

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut last_line: Option<String> = None;
            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    last_line = Some(line);
                }
            }
            if let Some(line) = last_line {
                match serde_json::from_str::<ReceiptWithHash>(&line) {
                    Ok(record) => {
                        state.last_hash = Some(record.receipt_hash);
                        state.sequence = record.sequence_number;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e,
                              "could not reinitialize chain state from final line");
                    }
                }
            }
        }

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a receipt, linking it into the hash chain.
    pub fn append(&self, receipt: Receipt) -> Result<ReceiptWithHash> {
        let mut state = self.state.lock().expect("receipt store lock poisoned");

        let receipt_hash = compute_receipt_hash(&receipt)?;
        let record = ReceiptWithHash {
            receipt,
            receipt_hash: receipt_hash.clone(),
            parent_hash: state.last_hash.clone(),
            sequence_number: state.sequence + 1,
        };

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        state.last_hash = Some(receipt_hash);
        state.sequence += 1;

        info!(
            receipt_id = %record.receipt.receipt_id,
            seq = record.sequence_number,
            hash = &record.receipt_hash[..8],
            "appended receipt"
        );

        Ok(record)
    }

    /// Read all receipts.
    ///
    /// With `skip_corrupt`, malformed lines are logged and skipped; without
    /// it they fail the read. With `verify_chain`, a broken parent link
    /// fails the read regardless.
    pub fn read_all(&self, verify_chain: bool, skip_corrupt: bool) -> Result<Vec<ReceiptWithHash>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        let mut corrupt = 0usize;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReceiptWithHash>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    corrupt += 1;
                    if skip_corrupt {
                        warn!(line = line_num + 1, error = %e, "skipping corrupt receipt line");
                    } else {
                        return Err(Error::CorruptRecord {
                            line: line_num + 1,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if corrupt > 0 {
            warn!(count = corrupt, "skipped corrupt receipt lines");
        }

        if verify_chain {
            for (i, record) in records.iter().enumerate() {
                let computed = compute_receipt_hash(&record.receipt)?;
                if computed != record.receipt_hash {
                    return Err(Error::hash_chain(
                        i,
                        format!("body hashes to {}..., stored {}...", &computed[..8], &record.receipt_hash[..8.min(record.receipt_hash.len())]),
                    ));
                }
            }
            for i in 1..records.len() {
                let expected = &records[i - 1].receipt_hash;
                if records[i].parent_hash.as_deref() != Some(expected.as_str()) {
                    return Err(Error::hash_chain(
                        i,
                        format!(
                            "expected parent {}..., got {:?}",
                            &expected[..8.min(expected.len())],
                            records[i].parent_hash.as_deref().map(|h| &h[..8.min(h.len())])
                        ),
                    ));
                }
            }
        }

        Ok(records)
    }

    /// Read the most recent `limit` receipts.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<ReceiptWithHash>> {
        let mut all = self.read_all(false, true)?;
        let start = all.len().saturating_sub(limit);
        Ok(all.split_off(start))
    }

    /// Linear scan with predicate combination.
    pub fn filter(&self, filter: &ReceiptFilter) -> Result<Vec<ReceiptWithHash>> {
        let all = self.read_all(false, true)?;
        Ok(all
            .into_iter()
            .filter(|r| Self::matches(r, filter))
            .collect())
    }

    /// Whether a receipt with the given id exists in the store.
    pub fn contains(&self, receipt_id: &str) -> Result<bool> {
        let all = self.read_all(false, true)?;
        Ok(all
            .iter()
            .any(|r| r.receipt.receipt_id.to_string() == receipt_id))
    }

    fn matches(record: &ReceiptWithHash, filter: &ReceiptFilter) -> bool {
        let receipt = &record.receipt;

        if let Some(start) = filter.start {
            if receipt.timestamp < start {
                return false;
            }
        }
        if let Some(end) = filter.end {
            if receipt.timestamp > end {
                return false;
            }
        }

        let policy = match &receipt.body {
            ReceiptBody::PolicyChange(pc) => Some(pc),
            _ => None,
        };

        if let Some(ref exp_id) = filter.experiment_id {
            match policy {
                Some(pc) if pc.experiment.experiment_id == *exp_id => {}
                _ => return false,
            }
        }
        if let Some(promoted) = filter.promoted {
            match policy {
                Some(pc) if pc.promoted == promoted => {}
                _ => return false,
            }
        }
        if let Some(domain) = filter.domain {
            match policy {
                Some(pc) if pc.experiment.intervention.domain == domain => {}
                _ => return false,
            }
        }
        if let Some(itype) = filter.intervention_type {
            match policy {
                Some(pc) if pc.experiment.intervention.intervention_type == itype => {}
                _ => return false,
            }
        }

        true
    }

    /// Pure integrity scan over the stored bytes.
    ///
    /// Corrupt lines count as tampering here; they are never silently
    /// skipped the way `read_all(skip_corrupt)` allows.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        if !self.path.exists() {
            return Ok(IntegrityReport {
                status: IntegrityStatus::Empty,
                total_receipts: 0,
                hash_chain_valid: true,
                tampered_receipts: Vec::new(),
                chain_breaks: Vec::new(),
            });
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records: Vec<Option<ReceiptWithHash>> = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<ReceiptWithHash>(&line).ok());
        }

        if records.is_empty() {
            return Ok(IntegrityReport {
                status: IntegrityStatus::Empty,
                total_receipts: 0,
                hash_chain_valid: true,
                tampered_receipts: Vec::new(),
                chain_breaks: Vec::new(),
            });
        }

        let mut tampered = Vec::new();
        let mut breaks = Vec::new();
        let mut recomputed: Vec<Option<String>> = Vec::with_capacity(records.len());

        for (i, maybe_record) in records.iter().enumerate() {
            match maybe_record {
                Some(record) => {
                    let computed = compute_receipt_hash(&record.receipt)?;
                    if computed != record.receipt_hash {
                        tampered.push(TamperedReceipt {
                            position: i,
                            sequence_number: record.sequence_number,
                            stored_hash: record.receipt_hash.clone(),
                            computed_hash: computed.clone(),
                        });
                    }
                    recomputed.push(Some(computed));
                }
                None => {
                    // Unparseable line: definitionally tampered.
                    tampered.push(TamperedReceipt {
                        position: i,
                        sequence_number: 0,
                        stored_hash: String::new(),
                        computed_hash: String::new(),
                    });
                    recomputed.push(None);
                }
            }
        }

        // The chain invariant is parent_hash == hash(previous record),
        // with the hash recomputed from the bytes: a rewritten body
        // breaks the chain at the following position.
        for i in 1..records.len() {
            let expected = recomputed[i - 1].clone();
            let actual = records[i].as_ref().and_then(|r| r.parent_hash.clone());
            match (&expected, &actual) {
                (Some(exp), Some(act)) if exp == act => {}
                (Some(exp), actual) => breaks.push(ChainBreak {
                    position: i,
                    expected_parent: exp.clone(),
                    actual_parent: actual.clone(),
                }),
                (None, _) => breaks.push(ChainBreak {
                    position: i,
                    expected_parent: String::new(),
                    actual_parent: actual.clone(),
                }),
            }
        }

        let valid = tampered.is_empty() && breaks.is_empty();
        debug!(
            total = records.len(),
            tampered = tampered.len(),
            breaks = breaks.len(),
            "integrity scan complete"
        );

        Ok(IntegrityReport {
            status: if valid {
                IntegrityStatus::Valid
            } else {
                IntegrityStatus::Invalid
            },
            total_receipts: records.len(),
            hash_chain_valid: breaks.is_empty(),
            tampered_receipts: tampered,
            chain_breaks: breaks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::types::{ConstitutionalPassReceipt, ReceiptBody};

    fn pass_receipt(n: usize) -> Receipt {
        Receipt::new(ReceiptBody::ConstitutionalPass(ConstitutionalPassReceipt {
            phase: "pre".into(),
            invariants_checked: n,
            invariants_passed: n,
            check_time_ms: 0.1,
            warnings: vec![],
        }))
    }

    #[test]
    fn test_append_links_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::open(dir.path().join("receipts.jsonl")).unwrap();

        let first = store.append(pass_receipt(1)).unwrap();
        let second = store.append(pass_receipt(2)).unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.parent_hash, None);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.parent_hash.as_deref(), Some(first.receipt_hash.as_str()));
    }

    #[test]
    fn test_reopen_restores_chain_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");

        let first_hash = {
            let store = ReceiptStore::open(&path).unwrap();
            store.append(pass_receipt(1)).unwrap().receipt_hash
        };

        let store = ReceiptStore::open(&path).unwrap();
        let second = store.append(pass_receipt(2)).unwrap();
        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.parent_hash.as_deref(), Some(first_hash.as_str()));
    }

    #[test]
    fn test_round_trip_hash_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::open(dir.path().join("receipts.jsonl")).unwrap();
        let appended = store.append(pass_receipt(3)).unwrap();

        let loaded = store.read_all(true, false).unwrap();
        assert_eq!(loaded.len(), 1);
        let rehashed = compute_receipt_hash(&loaded[0].receipt).unwrap();
        assert_eq!(rehashed, appended.receipt_hash);
    }

    #[test]
    fn test_tamper_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");
        let store = ReceiptStore::open(&path).unwrap();
        for n in 1..=3 {
            store.append(pass_receipt(n)).unwrap();
        }

        // Overwrite the middle line's body.
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        lines[1] = lines[1].replace("\"invariants_passed\":2", "\"invariants_passed\":99");
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = store.verify_integrity().unwrap();
        assert_eq!(report.status, IntegrityStatus::Invalid);
        assert_eq!(report.tampered_receipts.len(), 1);
        assert_eq!(report.tampered_receipts[0].position, 1);
        // The tampered body no longer hashes to what the next record
        // claims as its parent.
        assert_eq!(report.chain_breaks.len(), 1);
        assert_eq!(report.chain_breaks[0].position, 2);
    }

    #[test]
    fn test_chain_break_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");
        let store = ReceiptStore::open(&path).unwrap();
        for n in 1..=3 {
            store.append(pass_receipt(n)).unwrap();
        }

        // Replace the middle record wholesale (new hash, stale parent on
        // the next record).
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut middle: ReceiptWithHash = serde_json::from_str(&lines[1]).unwrap();
        middle.receipt = pass_receipt(42);
        middle.receipt_hash = compute_receipt_hash(&middle.receipt).unwrap();
        lines[1] = serde_json::to_string(&middle).unwrap();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let report = store.verify_integrity().unwrap();
        assert_eq!(report.status, IntegrityStatus::Invalid);
        assert!(!report.hash_chain_valid);
        assert_eq!(report.chain_breaks.len(), 1);
        assert_eq!(report.chain_breaks[0].position, 2);
    }

    #[test]
    fn test_corrupt_line_skipped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipts.jsonl");
        let store = ReceiptStore::open(&path).unwrap();
        store.append(pass_receipt(1)).unwrap();

        use std::io::Write as _;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n").unwrap();

        let records = store.read_all(false, true).unwrap();
        assert_eq!(records.len(), 1);

        assert!(store.read_all(false, false).is_err());

        // verify_integrity never skips: the corrupt line is tampering.
        let report = store.verify_integrity().unwrap();
        assert_eq!(report.status, IntegrityStatus::Invalid);
    }

    #[test]
    fn test_read_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::open(dir.path().join("receipts.jsonl")).unwrap();
        for n in 1..=5 {
            store.append(pass_receipt(n)).unwrap();
        }
        let recent = store.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence_number, 4);
        assert_eq!(recent[1].sequence_number, 5);
    }

    #[test]
    fn test_empty_store_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReceiptStore::open(dir.path().join("receipts.jsonl")).unwrap();
        let report = store.verify_integrity().unwrap();
        assert_eq!(report.status, IntegrityStatus::Empty);
        assert!(report.hash_chain_valid);
    }
}
