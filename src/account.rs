use rust_decimal::{Decimal, prelude::Zero};
use thiserror::Error;

use crate::request::RequestBook;

pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEventKind {
    Debited,
    Credited,
}

/// A validated balance change. Produced by the `handle_*` methods and applied
/// with [`Account::apply`] once the surrounding transfer is committed.
#[derive(Debug, Clone)]
pub struct AccountEvent {
    amount: Decimal,
    kind: AccountEventKind,
}

impl AccountEvent {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn kind(&self) -> AccountEventKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient balance: {balance} available, {amount} required")]
    InsufficientBalance { balance: Decimal, amount: Decimal },
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

#[derive(Debug)]
pub struct Account {
    user_id: UserId,
    balance: Decimal,
    pub requests: RequestBook,
}

impl Account {
    pub fn new(user_id: impl Into<UserId>, balance: Decimal) -> Self {
        Self {
            user_id: user_id.into(),
            balance,
            requests: RequestBook::default(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn apply(&mut self, event: &AccountEvent) {
        match event.kind {
            AccountEventKind::Debited => {
                self.balance -= event.amount;
            }
            AccountEventKind::Credited => {
                self.balance += event.amount;
            }
        }
    }

    pub fn handle_debit(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        ensure_positive(amount)?;
        if self.balance < amount {
            return Err(AccountError::InsufficientBalance {
                balance: self.balance,
                amount,
            });
        }
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Debited,
        })
    }

    pub fn handle_credit(&self, amount: Decimal) -> Result<AccountEvent, AccountError> {
        ensure_positive(amount)?;
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Credited,
        })
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AccountError> {
    if amount > Decimal::zero() {
        Ok(())
    } else {
        Err(AccountError::NonPositiveAmount(amount))
    }
}
