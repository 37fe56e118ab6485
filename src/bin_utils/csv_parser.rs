use std::io::Read;

use crate::{
    account::{AccountId, Currency, OwnerId},
    command::OperationKind,
};
use csv::{Position, Reader, ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Open,
    Deposit,
    Withdraw,
    Transfer,
}

impl RecordKind {
    /// `None` for account opening, which bypasses the engine.
    pub fn operation(self) -> Option<OperationKind> {
        match self {
            RecordKind::Open => None,
            RecordKind::Deposit => Some(OperationKind::Deposit),
            RecordKind::Withdraw => Some(OperationKind::Withdraw),
            RecordKind::Transfer => Some(OperationKind::Transfer),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub account: AccountId,
    pub to: Option<AccountId>,
    pub owner: Option<OwnerId>,
    pub currency: Option<Currency>,
    pub amount: Option<i64>,
}

/// Reads operation records from CSV input, tagging each with the line it
/// starts at. A row that fails to parse is yielded as an error and reading
/// carries on with the next one.
pub struct CsvRecordParser<R> {
    reader: Reader<R>,
    headers: StringRecord,
    row: StringRecord,
}

impl<R> CsvRecordParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        // a missing header row surfaces as a deserialization error per record
        let headers = reader.headers().cloned().unwrap_or_default();

        Self {
            reader,
            headers,
            row: StringRecord::new(),
        }
    }
}

impl<R> Iterator for CsvRecordParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Record, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(false) => None,
            Ok(true) => {
                let line = self.row.position().map_or(0, Position::line);
                Some((line, self.row.deserialize(Some(&self.headers))))
            }
            Err(err) => {
                let line = err
                    .position()
                    .map_or_else(|| self.reader.position().line(), Position::line);
                Some((line, Err(err)))
            }
        }
    }
}
