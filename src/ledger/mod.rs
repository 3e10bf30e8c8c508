use thiserror::Error;

pub mod file_ledger;
pub mod in_memory_ledger;
pub mod payload;

/// One committed transfer: the signed canonical payload and its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub payload: String,
    pub signature: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Ledger corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },
    #[error("Failed to encode ledger record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only, totally ordered log of committed transfers.
///
/// `append` returns only once the entry is durable; `read_all` yields every
/// entry oldest first and can be called any number of times.
pub trait TransactionLedger: Send + Sync {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
}
