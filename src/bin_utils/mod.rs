//! Replays a CSV batch through [`BalanceEngine`], acting as the request
//! layer the engine normally sits behind. Requests in the batch are
//! considered authorized already.

use std::io::{Read, Write};

use crate::{
    account::{Account, AccountId},
    command::{CommandError, OperationRequest},
    engine::{BalanceEngine, EngineError},
    store::{AccountStore, InMemoryAccountStore, OptimisticAccountStore, StoreError},
};
use anyhow::Result;
use csv_parser::{CsvRecordParser, Record};
use csv_printer::{AccountRow, print_accounts};
use thiserror::Error;

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreKind {
    /// Per account locks
    #[default]
    Locking,
    /// Versioned records with retries on conflicts
    Optimistic,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub store: StoreKind,
    /// Only used by [`StoreKind::Optimistic`].
    pub max_retries: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            max_retries: OptimisticAccountStore::DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Malformed record: {0}")]
    Malformed(#[from] csv::Error),
    #[error("Opening account {account} requires {field}")]
    MissingField {
        account: AccountId,
        field: &'static str,
    },
    #[error("Opening balance must not be negative, got {amount}")]
    NegativeOpeningBalance { amount: i64 },
    #[error("Cannot open account: {0}")]
    Open(StoreError),
    #[error("Incomplete record: {0}")]
    Incomplete(CommandError),
    #[error(transparent)]
    Rejected(#[from] EngineError),
}

impl RecordError {
    /// Rejections by the engine's business rules. The engine logs every
    /// rejection it returns, these need no further reporting.
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, RecordError::Rejected(err) if !err.is_transient())
    }
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: ServiceConfig,
    pub error_printer: Box<dyn FnMut(u64, RecordError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(self) -> Result<()> {
        let config = self.config;
        match config.store {
            StoreKind::Locking => self.run_with(InMemoryAccountStore::default()),
            StoreKind::Optimistic => self.run_with(OptimisticAccountStore::new(config.max_retries)),
        }
    }

    fn run_with<S: AccountStore>(mut self, store: S) -> Result<()> {
        let parser = CsvRecordParser::new(self.input);
        let engine = BalanceEngine::new(store);

        for (line, row) in parser {
            if let Err(err) = row
                .map_err(RecordError::from)
                .and_then(|record| apply_record(&engine, record))
            {
                (self.error_printer)(line, err);
            }
        }

        print_accounts(
            self.output,
            engine.store().accounts().iter().map(AccountRow::from),
        )
    }
}

fn apply_record<S: AccountStore>(
    engine: &BalanceEngine<S>,
    record: Record,
) -> Result<(), RecordError> {
    let Some(kind) = record.kind.operation() else {
        return open_account(engine.store(), &record);
    };
    let request = OperationRequest::from_parts(kind, record.account, record.to, record.amount)
        .map_err(RecordError::Incomplete)?;
    engine.execute(request)?;
    Ok(())
}

fn open_account<S: AccountStore>(store: &S, record: &Record) -> Result<(), RecordError> {
    let owner = record.owner.ok_or(RecordError::MissingField {
        account: record.account,
        field: "owner",
    })?;
    let currency = record.currency.ok_or(RecordError::MissingField {
        account: record.account,
        field: "currency",
    })?;
    let amount = record.amount.unwrap_or_default();
    let amount =
        u64::try_from(amount).map_err(|_| RecordError::NegativeOpeningBalance { amount })?;
    store
        .insert(Account::new(record.account, owner, currency, amount))
        .map_err(RecordError::Open)
}
