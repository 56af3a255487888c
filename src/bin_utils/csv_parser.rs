use std::io::Read;

use crate::{
    account::AccountId,
    command::{Command, CommandKind},
};
use csv::{DeserializeRecordsIntoIter, Trim};
use serde::Deserialize;

/// One CSV row: `type,account,to,amount`. The amount is kept as text so a
/// malformed amount is reported by the coordinator instead of failing the
/// whole row.
#[derive(Debug, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub account: AccountId,
    pub to: Option<AccountId>,
    pub amount: Option<String>,
}

impl From<Transaction> for Command {
    fn from(row: Transaction) -> Self {
        Command::parse(row.kind, row.account, row.to, row.amount.as_deref())
    }
}

/// Parses a command list in CSV format, yielding each row with its line.
pub struct CsvCommandParser<R> {
    iter: DeserializeRecordsIntoIter<R, Transaction>,
}

impl<R> CsvCommandParser<R>
where
    R: Read,
{
    /// Reads the header row up front, so the lines reported for rows start
    /// after it. Fails if the header itself can't be read.
    pub fn new(source: R) -> csv::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        reader.headers()?;

        Ok(Self {
            iter: reader.into_deserialize(),
        })
    }
}

impl<R> Iterator for CsvCommandParser<R>
where
    R: Read,
{
    type Item = (u64, csv::Result<Transaction>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
