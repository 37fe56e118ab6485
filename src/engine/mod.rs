use std::fmt;

use thiserror::Error;

use crate::{
    account::{Account, AccountError},
    command::CommandError,
    store::StoreError,
};

pub mod balance_engine;

pub use balance_engine::BalanceEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    CommandErr(#[from] CommandError),
    #[error(transparent)]
    AccountErr(#[from] AccountError),
    #[error(transparent)]
    StoreErr(#[from] StoreError),
}

/// Failure taxonomy exposed to the request layer, independent of which
/// component detected the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccountNotFound,
    InvalidAmount,
    InsufficientFunds,
    CurrencyMismatch,
    SameAccountTransfer,
    StorageFailure,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CommandErr(err) => match err {
                CommandError::InvalidAmount { .. }
                | CommandError::AmountRequired { .. }
                | CommandError::DestinationRequired { .. } => ErrorKind::InvalidAmount,
                CommandError::SameAccountTransfer { .. } => ErrorKind::SameAccountTransfer,
            },
            EngineError::AccountErr(err) => match err {
                AccountError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
                AccountError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
                AccountError::BalanceOverflow { .. } => ErrorKind::InvalidAmount,
            },
            EngineError::StoreErr(StoreError::NotFound { .. }) => ErrorKind::AccountNotFound,
            EngineError::StoreErr(_) => ErrorKind::StorageFailure,
        }
    }

    /// Only storage failures are worth retrying, the operation was not
    /// applied and may succeed on a second attempt.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::StorageFailure
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Post-operation snapshots of the affected accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Deposited(Account),
    Withdrawn(Account),
    Transferred { from: Account, to: Account },
}
