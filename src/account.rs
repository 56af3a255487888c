use std::collections::BTreeMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;

pub type AccountId = String;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Amount can not be negative: {amount}")]
    NegativeAmount { amount: Decimal },
    #[error("Account does not exist: {id}")]
    AccountNotFound { id: AccountId },
    #[error("Balance of `{id}` would overflow")]
    BalanceOverflow { id: AccountId },
}

/// Read access to accounts. Safe to use without holding any account lock,
/// results are snapshots and may be stale by the time they are used.
pub trait AccountReader {
    fn exists(&self, id: &str) -> bool;

    /// All known account identifiers, in ascending order.
    fn all_accounts(&self) -> Vec<AccountId>;

    fn balance(&self, id: &str) -> Option<Decimal>;
}

/// Balance mutations.
///
/// Every method is a read-modify-write sequence that is NOT atomic on its
/// own: callers must hold the lock of the account identified by `id` for the
/// whole call (see [`crate::coordinator`]).
pub trait AccountWriter: AccountReader {
    /// Debits `amount` and returns the new balance, or `None` (with no
    /// mutation) when the balance is lower than `amount`.
    ///
    /// The account must exist, calling this for an unknown account is a
    /// contract violation reported as [`AccountError::AccountNotFound`].
    fn reduce(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError>;

    /// Credits an existing account. Returns `None` for an unknown account,
    /// which is left uncreated.
    fn deposit(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError>;

    /// Credits the account, creating it with `amount` if it is unknown.
    fn create_and_deposit(&self, id: &str, amount: Decimal) -> Result<Decimal, AccountError>;
}

/// Account balances kept in process memory.
///
/// The inner lock only keeps the map itself consistent, it does not make
/// the [`AccountWriter`] operations atomic.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    balances: RwLock<BTreeMap<AccountId, Decimal>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountReader for InMemoryAccountStore {
    fn exists(&self, id: &str) -> bool {
        self.balances.read().contains_key(id)
    }

    fn all_accounts(&self) -> Vec<AccountId> {
        self.balances.read().keys().cloned().collect()
    }

    fn balance(&self, id: &str) -> Option<Decimal> {
        self.balances.read().get(id).copied()
    }
}

impl AccountWriter for InMemoryAccountStore {
    fn reduce(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError> {
        check_not_negative(amount)?;

        let initial_balance = self
            .balance(id)
            .ok_or_else(|| AccountError::AccountNotFound { id: id.to_owned() })?;
        if initial_balance < amount {
            return Ok(None);
        }

        let new_balance = initial_balance - amount;
        self.balances.write().insert(id.to_owned(), new_balance);
        Ok(Some(new_balance))
    }

    fn deposit(&self, id: &str, amount: Decimal) -> Result<Option<Decimal>, AccountError> {
        check_not_negative(amount)?;

        let mut balances = self.balances.write();
        let Some(balance) = balances.get_mut(id) else {
            return Ok(None);
        };
        *balance = credit(id, *balance, amount)?;
        Ok(Some(*balance))
    }

    fn create_and_deposit(&self, id: &str, amount: Decimal) -> Result<Decimal, AccountError> {
        check_not_negative(amount)?;

        let mut balances = self.balances.write();
        let balance = balances.entry(id.to_owned()).or_insert(Decimal::ZERO);
        *balance = credit(id, *balance, amount)?;
        Ok(*balance)
    }
}

fn check_not_negative(amount: Decimal) -> Result<(), AccountError> {
    if amount < Decimal::ZERO {
        Err(AccountError::NegativeAmount { amount })
    } else {
        Ok(())
    }
}

fn credit(id: &str, balance: Decimal, amount: Decimal) -> Result<Decimal, AccountError> {
    balance
        .checked_add(amount)
        .ok_or_else(|| AccountError::BalanceOverflow { id: id.to_owned() })
}
