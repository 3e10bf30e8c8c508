use crate::{
    catalog::{AccountCatalog, CatalogError},
    ledger::payload::TransferPayload,
    request::{RequestError, RequestId},
};

/// What a transfer settles besides moving money.
#[derive(Debug, Clone, Copy)]
pub enum Settlement<'a> {
    Nothing,
    /// The payer's pending request must still exist; it is consumed.
    Request { id: RequestId, token: &'a str },
    /// Replay of a paid request: consumed if still pending, otherwise the
    /// restored snapshot already reflects it.
    ReplayedRequest { id: Option<RequestId>, token: &'a str },
}

/// Moves `payload.amount` from `payload.from` to `payload.to` with both
/// accounts locked.
///
/// Events are validated first, then `commit` runs, and only if it succeeds
/// are the events applied. A failing `commit` leaves both accounts untouched.
pub fn execute_transfer<E>(
    catalog: &AccountCatalog,
    payload: &TransferPayload,
    settlement: Settlement<'_>,
    commit: impl FnOnce() -> Result<(), E>,
) -> Result<(), E>
where
    E: From<CatalogError> + From<RequestError>,
{
    catalog.transfer(&payload.from, &payload.to, |payer, payee| {
        if let Settlement::Request { id, token } = settlement {
            if payer.requests.find(id).is_none() {
                return Err(RequestError::InvalidIdentifier(token.to_owned()).into());
            }
        }
        let debit = payer
            .handle_debit(payload.amount)
            .map_err(CatalogError::from)?;
        let credit = payee
            .handle_credit(payload.amount)
            .map_err(CatalogError::from)?;

        commit()?;

        payer.apply(&debit);
        payee.apply(&credit);
        match settlement {
            Settlement::Nothing => {}
            Settlement::Request { id, token }
            | Settlement::ReplayedRequest {
                id: Some(id),
                token,
            } => {
                payer.requests.remove(id);
                payer.requests.record_paid(token);
            }
            Settlement::ReplayedRequest { id: None, token } => {
                payer.requests.record_paid(token);
            }
        }
        Ok(())
    })
}
