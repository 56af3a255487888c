use std::fmt;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    account::AccountId,
    coordinator::{DepositResult, TransactionCoordinator, TxResult},
};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Deposit,
    Transfer,
}

/// A mutation request as received from the outside, amounts already parsed.
/// `None` amounts are either missing or unparseable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Deposit {
        account: AccountId,
        amount: Option<Decimal>,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Option<Decimal>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Deposit(DepositResult),
    Transfer(TxResult),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Deposit(DepositResult::Success) | Self::Transfer(TxResult::Success)
        )
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit(result) => write!(f, "deposit: {result}"),
            Self::Transfer(result) => write!(f, "transfer: {result}"),
        }
    }
}

impl Command {
    /// Builds a command from its textual parts. A transfer without a
    /// destination gets an empty one and is rejected by the coordinator.
    pub fn parse(
        kind: CommandKind,
        account: AccountId,
        to: Option<AccountId>,
        amount: Option<&str>,
    ) -> Self {
        let amount = amount.and_then(parse_amount);
        match kind {
            CommandKind::Deposit => Self::Deposit { account, amount },
            CommandKind::Transfer => Self::Transfer {
                from: account,
                to: to.unwrap_or_default(),
                amount,
            },
        }
    }

    pub fn execute<C>(&self, coordinator: &C) -> CommandOutcome
    where
        C: TransactionCoordinator + ?Sized,
    {
        match self {
            Self::Deposit { account, amount } => {
                CommandOutcome::Deposit(coordinator.deposit(account, *amount))
            }
            Self::Transfer { from, to, amount } => {
                CommandOutcome::Transfer(coordinator.transfer(from, to, *amount))
            }
        }
    }
}

/// Parses decimal text, plain (`12.50`) or scientific (`1.25e1`).
///
/// Amounts must fit a `Decimal` exactly: at most 28 fractional digits and a
/// magnitude below 2^96. Text that would need rounding is rejected, like
/// anything else that is not a number.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => scale_exact(
            Decimal::from_str_exact(mantissa).ok()?,
            exponent.parse().ok()?,
        ),
        None => Decimal::from_str_exact(text).ok(),
    }
}

/// `value * 10^exponent`, or `None` if the result is not representable.
fn scale_exact(mut value: Decimal, exponent: i32) -> Option<Decimal> {
    let scale = i64::from(value.scale()) - i64::from(exponent);
    if scale >= 0 {
        value.set_scale(u32::try_from(scale).ok()?).ok()?;
        return Some(value);
    }
    let factor = 10i128.checked_pow(u32::try_from(-scale).ok()?)?;
    Decimal::try_from_i128_with_scale(value.mantissa().checked_mul(factor)?, 0).ok()
}
