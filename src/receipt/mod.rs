//! Hash-chained receipt envelope and append-only store.

mod store;
mod types;

pub use store::{
    ChainBreak, IntegrityReport, IntegrityStatus, ReceiptFilter, ReceiptStore, TamperedReceipt,
};
pub use types::{
    compute_receipt_hash, ConstitutionalBlockReceipt, ConstitutionalPassReceipt,
    ConstitutionalViolationReceipt, EpisodeFailureReceipt, HealthEscalationReceipt,
    ModelCallReceipt, ModelTimeoutReceipt, PhaseValidationReceipt, Receipt, ReceiptBody,
    ReceiptId, ReceiptWithHash,
};
