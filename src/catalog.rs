use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard, RwLock};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    account::{Account, AccountError, UserId},
    request::RequestBook,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("User \"{0}\" not found")]
    UserNotFound(UserId),
    #[error("User \"{0}\" already has an account")]
    UserExists(UserId),
    #[error("User \"{0}\" cannot transfer to itself")]
    SelfTransfer(UserId),
    #[error("Account \"{0}\" is busy, retry later")]
    LockTimeout(UserId),
    #[error(transparent)]
    Account(#[from] AccountError),
}

/// Owns every account. Each account sits behind its own mutex; operations
/// spanning two accounts lock them in ascending user id order.
pub struct AccountCatalog {
    accounts: RwLock<HashMap<UserId, Arc<Mutex<Account>>>>,
    initial_balance: Decimal,
    lock_timeout: Duration,
}

impl AccountCatalog {
    pub fn new(initial_balance: Decimal, lock_timeout: Duration) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            initial_balance,
            lock_timeout,
        }
    }

    pub fn open_account(&self, user_id: &str) -> Result<(), CatalogError> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(user_id) {
            return Err(CatalogError::UserExists(user_id.to_owned()));
        }
        accounts.insert(
            user_id.to_owned(),
            Arc::new(Mutex::new(Account::new(user_id, self.initial_balance))),
        );
        Ok(())
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.accounts.read().contains_key(user_id)
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.accounts.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn lookup(&self, user_id: &str) -> Result<Arc<Mutex<Account>>, CatalogError> {
        self.accounts
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| CatalogError::UserNotFound(user_id.to_owned()))
    }

    /// Runs `critical` with exclusive access to one account.
    pub fn with_account<T, E>(
        &self,
        user_id: &str,
        critical: impl FnOnce(&mut Account) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CatalogError>,
    {
        let handle = self.lookup(user_id)?;
        let mut guard = self.lock(user_id, &handle)?;
        critical(&mut guard)
    }

    pub fn balance(&self, user_id: &str) -> Result<Decimal, CatalogError> {
        self.with_account(user_id, |acc| Ok(acc.balance()))
    }

    pub fn debit(&self, user_id: &str, amount: Decimal) -> Result<(), CatalogError> {
        self.with_account(user_id, |acc| {
            let evt = acc.handle_debit(amount)?;
            acc.apply(&evt);
            Ok(())
        })
    }

    pub fn credit(&self, user_id: &str, amount: Decimal) -> Result<(), CatalogError> {
        self.with_account(user_id, |acc| {
            let evt = acc.handle_credit(amount)?;
            acc.apply(&evt);
            Ok(())
        })
    }

    /// Runs `critical` holding both the payer's and the payee's lock, so the
    /// whole debit/credit pair is atomic with respect to either account.
    pub fn transfer<T, E>(
        &self,
        payer_id: &str,
        payee_id: &str,
        critical: impl FnOnce(&mut Account, &mut Account) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CatalogError>,
    {
        if payer_id == payee_id {
            return Err(CatalogError::SelfTransfer(payer_id.to_owned()).into());
        }
        let payer = self.lookup(payer_id)?;
        let payee = self.lookup(payee_id)?;

        if payer_id < payee_id {
            let mut payer_guard = self.lock(payer_id, &payer)?;
            let mut payee_guard = self.lock(payee_id, &payee)?;
            critical(&mut payer_guard, &mut payee_guard)
        } else {
            let mut payee_guard = self.lock(payee_id, &payee)?;
            let mut payer_guard = self.lock(payer_id, &payer)?;
            critical(&mut payer_guard, &mut payee_guard)
        }
    }

    pub fn total_balance(&self) -> Result<Decimal, CatalogError> {
        self.handles()
            .iter()
            .map(|(id, h)| -> Result<Decimal, CatalogError> {
                Ok(self.lock(id, h)?.balance())
            })
            .sum()
    }

    pub fn request_books(&self) -> Result<BTreeMap<UserId, RequestBook>, CatalogError> {
        self.handles()
            .iter()
            .map(|(id, h)| -> Result<(UserId, RequestBook), CatalogError> {
                Ok((id.clone(), self.lock(id, h)?.requests.clone()))
            })
            .collect()
    }

    /// Books for unknown users are dropped.
    pub fn restore_request_books(&self, books: BTreeMap<UserId, RequestBook>) -> usize {
        let accounts = self.accounts.read();
        let mut restored = 0;
        for (user_id, book) in books {
            match accounts.get(&user_id) {
                Some(handle) => {
                    handle.lock().requests = book;
                    restored += 1;
                }
                None => tracing::warn!(user = %user_id, "dropping request book of unknown user"),
            }
        }
        restored
    }

    /// Account handles, cloned out so no account is locked under the map lock.
    fn handles(&self) -> Vec<(UserId, Arc<Mutex<Account>>)> {
        self.accounts
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect()
    }

    fn lock<'a>(
        &self,
        user_id: &str,
        handle: &'a Arc<Mutex<Account>>,
    ) -> Result<MutexGuard<'a, Account>, CatalogError> {
        handle
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| CatalogError::LockTimeout(user_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    fn catalog() -> AccountCatalog {
        let catalog = AccountCatalog::new(Decimal::from_u32(100).unwrap(), Duration::from_millis(50));
        catalog.open_account("alice").unwrap();
        catalog.open_account("bob").unwrap();
        catalog
    }

    #[test]
    fn open_and_lookup_accounts() {
        let catalog = catalog();
        assert!(matches!(
            catalog.open_account("alice"),
            Err(CatalogError::UserExists(_))
        ));
        assert!(matches!(
            catalog.lookup("carol"),
            Err(CatalogError::UserNotFound(_))
        ));
        assert_eq!(catalog.user_ids(), vec!["alice", "bob"]);
        assert_eq!(catalog.balance("bob").unwrap(), Decimal::from_u32(100).unwrap());
    }

    #[test]
    fn debit_and_credit() {
        let catalog = catalog();
        catalog.debit("alice", Decimal::from_u32(40).unwrap()).unwrap();
        catalog.credit("bob", Decimal::from_u32(40).unwrap()).unwrap();
        assert_eq!(catalog.balance("alice").unwrap(), Decimal::from_u32(60).unwrap());
        assert_eq!(catalog.balance("bob").unwrap(), Decimal::from_u32(140).unwrap());

        let err = catalog
            .debit("alice", Decimal::from_u32(61).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Account(AccountError::InsufficientBalance { .. })
        ));
        assert_eq!(catalog.balance("alice").unwrap(), Decimal::from_u32(60).unwrap());
    }

    #[test]
    fn transfer_keeps_total_balance() {
        let catalog = catalog();
        let amount = Decimal::from_u32(25).unwrap();
        catalog
            .transfer("bob", "alice", |payer, payee| {
                let debit = payer.handle_debit(amount)?;
                let credit = payee.handle_credit(amount)?;
                payer.apply(&debit);
                payee.apply(&credit);
                Ok::<_, CatalogError>(())
            })
            .unwrap();
        assert_eq!(catalog.balance("alice").unwrap(), Decimal::from_u32(125).unwrap());
        assert_eq!(catalog.balance("bob").unwrap(), Decimal::from_u32(75).unwrap());
        assert_eq!(catalog.total_balance().unwrap(), Decimal::from_u32(200).unwrap());

        let err = catalog
            .transfer("bob", "bob", |_, _| Ok::<_, CatalogError>(()))
            .unwrap_err();
        assert!(matches!(err, CatalogError::SelfTransfer(_)));
    }

    #[test]
    fn busy_account_times_out() {
        let catalog = catalog();
        let handle = catalog.lookup("alice").unwrap();
        let _held = handle.lock();
        let err = catalog.balance("alice").unwrap_err();
        assert!(matches!(err, CatalogError::LockTimeout(user) if user == "alice"));

        // aggregate reads wait no longer than single-account ones
        assert!(matches!(
            catalog.total_balance(),
            Err(CatalogError::LockTimeout(user)) if user == "alice"
        ));
        assert!(matches!(
            catalog.request_books(),
            Err(CatalogError::LockTimeout(_))
        ));
    }

    #[test]
    fn concurrent_transfers_never_overdraw() {
        let catalog = Arc::new(AccountCatalog::new(
            Decimal::from_u32(100).unwrap(),
            Duration::from_secs(5),
        ));
        catalog.open_account("alice").unwrap();
        catalog.open_account("bob").unwrap();

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    let (from, to) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
                    for _ in 0..50 {
                        let amount = Decimal::from_u32(7).unwrap();
                        let _ = catalog.transfer(from, to, |payer, payee| {
                            let debit = payer.handle_debit(amount)?;
                            let credit = payee.handle_credit(amount)?;
                            payer.apply(&debit);
                            payee.apply(&credit);
                            Ok::<_, CatalogError>(())
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(catalog.total_balance().unwrap(), Decimal::from_u32(200).unwrap());
        assert!(catalog.balance("alice").unwrap() >= Decimal::ZERO);
        assert!(catalog.balance("bob").unwrap() >= Decimal::ZERO);
    }
}
