//! Batch driver: replays a CSV command list through a fresh ledger and
//! prints the resulting balances.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use crate::{
    account::{AccountReader, InMemoryAccountStore},
    command::{Command, CommandOutcome},
    config::CoordinatorConfig,
    coordinator::simple_coordinator::SimpleCoordinator,
};
use anyhow::{Context, Result};
use csv_parser::CsvCommandParser;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
pub mod csv_parser;

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: CoordinatorConfig,
    /// Called with the line number of every command that did not succeed.
    pub error_printer: Box<dyn FnMut(u64, CommandOutcome)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvCommandParser::new(self.input).context("Failed to read the CSV header")?;

        let store = Arc::new(InMemoryAccountStore::new());
        let coordinator = SimpleCoordinator::with_config(Arc::clone(&store), &self.config);

        let (mut applied, mut rejected) = (0usize, 0usize);
        for (line, row) in parser {
            let row = row.with_context(|| format!("Malformed command at line {line}"))?;
            let outcome = Command::from(row).execute(&coordinator);
            if outcome.is_success() {
                applied += 1;
            } else {
                rejected += 1;
                (self.error_printer)(line, outcome);
            }
        }
        info!(applied, rejected, "command list processed");

        write_balances(self.output, store.as_ref())
    }
}

#[derive(Serialize)]
struct BalanceRow<'a> {
    account: &'a str,
    balance: Decimal,
}

/// Writes `account,balance` rows, ascending by account.
fn write_balances(output: impl Write, accounts: &impl AccountReader) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    for account in accounts.all_accounts() {
        let Some(balance) = accounts.balance(&account) else {
            continue;
        };
        writer
            .serialize(BalanceRow {
                account: &account,
                balance,
            })
            .with_context(|| format!("Failed to write the balance of `{account}`"))?;
    }
    writer.flush().context("Failed to flush balances")
}
