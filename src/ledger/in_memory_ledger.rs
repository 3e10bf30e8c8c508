use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;

use super::{LedgerEntry, LedgerError, TransactionLedger};

#[derive(Default)]
pub struct InMemoryTransactionLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryTransactionLedger {
    /// Makes every following append fail, as a full disk would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionLedger for InMemoryTransactionLedger {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(io::Error::other("ledger storage unavailable").into());
        }
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.lock().clone())
    }
}
