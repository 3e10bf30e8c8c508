use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    catalog::{AccountCatalog, CatalogError},
    ledger::{
        LedgerEntry, LedgerError, TransactionLedger,
        payload::{PayloadError, TransferKind, TransferPayload},
    },
    request::{CapabilityCipher, RequestError},
    transfer::{Settlement, execute_transfer},
};

#[derive(Debug, Error)]
enum ReplayError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Re-applies committed transfers on top of freshly opened accounts.
///
/// Entries that no longer apply (unknown user, unparsable payload, balance
/// too low) are skipped with a warning; one bad entry never blocks the rest.
pub fn replay(
    catalog: &AccountCatalog,
    cipher: &CapabilityCipher,
    entries: &[LedgerEntry],
) -> ReplayReport {
    let mut report = ReplayReport::default();
    for (seq, entry) in entries.iter().enumerate() {
        match replay_entry(catalog, cipher, entry) {
            Ok(()) => report.applied += 1,
            Err(err) => {
                warn!(seq, payload = %entry.payload, %err, "skipping ledger entry");
                report.skipped += 1;
            }
        }
    }
    report
}

fn replay_entry(
    catalog: &AccountCatalog,
    cipher: &CapabilityCipher,
    entry: &LedgerEntry,
) -> Result<(), ReplayError> {
    let payload: TransferPayload = entry.payload.parse()?;
    let settlement = match &payload.kind {
        TransferKind::PayRequest { token } => Settlement::ReplayedRequest {
            id: cipher.open(token).ok(),
            token: token.as_str(),
        },
        TransferKind::MakePayment | TransferKind::ConfirmQrCode { .. } => Settlement::Nothing,
    };
    debug!(payload = %entry.payload, "replaying");
    execute_transfer(catalog, &payload, settlement, || Ok::<_, ReplayError>(()))
}

/// Rebuilds balances from the whole ledger.
pub fn recover(
    catalog: &AccountCatalog,
    cipher: &CapabilityCipher,
    ledger: &dyn TransactionLedger,
) -> Result<ReplayReport, LedgerError> {
    let entries = ledger.read_all()?;
    let report = replay(catalog, cipher, &entries);
    info!(
        applied = report.applied,
        skipped = report.skipped,
        "ledger replayed"
    );
    Ok(report)
}
