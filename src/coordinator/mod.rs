use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

pub mod lock_registry;
pub mod simple_coordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositResult {
    Success,

    ErrorTimeout,
    ErrorNotFound,
    ErrorIncorrectAmount,

    ErrorUnknown,
}

impl DepositResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ErrorTimeout => "ERROR_TIMEOUT",
            Self::ErrorNotFound => "ERROR_NOT_FOUND",
            Self::ErrorIncorrectAmount => "ERROR_INCORRECT_AMOUNT",
            Self::ErrorUnknown => "ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for DepositResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxResult {
    Success,

    ErrorTimeout,
    ErrorIncorrectAmount,
    ErrorFromNotFound,
    ErrorSameFromTo,
    ErrorToNotFound,
    ErrorInsufficientAmount,

    ErrorUnknown,
}

impl TxResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::ErrorTimeout => "ERROR_TIMEOUT",
            Self::ErrorIncorrectAmount => "ERROR_INCORRECT_AMOUNT",
            Self::ErrorFromNotFound => "ERROR_FROM_NOT_FOUND",
            Self::ErrorSameFromTo => "ERROR_SAME_FROM_TO",
            Self::ErrorToNotFound => "ERROR_TO_NOT_FOUND",
            Self::ErrorInsufficientAmount => "ERROR_INSUFFICIENT_AMOUNT",
            Self::ErrorUnknown => "ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for TxResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point for every balance mutation.
///
/// Implementations classify every failure into a result code instead of
/// returning errors, including a panic raised while account locks are held.
/// An empty identifier is treated as a missing one and a `None` amount as an
/// absent or unparseable one.
pub trait TransactionCoordinator {
    /// Creates the account if needed and deposits `amount` into it.
    fn deposit(&self, id: &str, amount: Option<Decimal>) -> DepositResult;

    /// Moves `amount` from `from` to `to`, both debit and credit or neither.
    fn transfer(&self, from: &str, to: &str, amount: Option<Decimal>) -> TxResult;
}
