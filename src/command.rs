use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::account::AccountId;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Transfer,
}

/// Strictly positive number of minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    /// Returns `None` for zero and negative values.
    pub fn new(minor_units: i64) -> Option<Self> {
        u64::try_from(minor_units)
            .ok()
            .filter(|units| *units > 0)
            .map(Self)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Balance changing request as handed over by the request layer.
/// Amounts are not validated yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRequest {
    Deposit {
        account_id: AccountId,
        amount: i64,
    },
    Withdraw {
        account_id: AccountId,
        amount: i64,
    },
    Transfer {
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChangeCommand {
    pub account_id: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCommand {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Amount must be positive for {action:?}, got {amount}")]
    InvalidAmount { action: OperationKind, amount: i64 },
    #[error("Amount is required for {action:?}")]
    AmountRequired { action: OperationKind },
    #[error("Destination account is required for {action:?}")]
    DestinationRequired { action: OperationKind },
    #[error("Cannot transfer from account {account_id} to itself")]
    SameAccountTransfer { account_id: AccountId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountCommand {
    Deposit(BalanceChangeCommand),
    Withdraw(BalanceChangeCommand),
    Transfer(TransferCommand),
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Deposit { .. } => OperationKind::Deposit,
            Self::Withdraw { .. } => OperationKind::Withdraw,
            Self::Transfer { .. } => OperationKind::Transfer,
        }
    }

    /// Builds a request out of loosely typed fields, e.g. a CSV row.
    /// `to` is ignored for everything but transfers.
    pub fn from_parts(
        kind: OperationKind,
        account_id: AccountId,
        to: Option<AccountId>,
        amount: Option<i64>,
    ) -> Result<Self, CommandError> {
        let amount = amount.ok_or(CommandError::AmountRequired { action: kind })?;
        match kind {
            OperationKind::Deposit => Ok(Self::Deposit { account_id, amount }),
            OperationKind::Withdraw => Ok(Self::Withdraw { account_id, amount }),
            OperationKind::Transfer => {
                let to_account_id = to.ok_or(CommandError::DestinationRequired { action: kind })?;
                Ok(Self::Transfer {
                    from_account_id: account_id,
                    to_account_id,
                    amount,
                })
            }
        }
    }

    pub fn validate(self) -> Result<AccountCommand, CommandError> {
        match self {
            Self::Deposit { account_id, amount } => {
                AccountCommand::deposit(account_id, amount).map(AccountCommand::Deposit)
            }
            Self::Withdraw { account_id, amount } => {
                AccountCommand::withdraw(account_id, amount).map(AccountCommand::Withdraw)
            }
            Self::Transfer {
                from_account_id,
                to_account_id,
                amount,
            } => AccountCommand::transfer(from_account_id, to_account_id, amount)
                .map(AccountCommand::Transfer),
        }
    }
}

impl AccountCommand {
    pub fn deposit(
        account_id: AccountId,
        amount: i64,
    ) -> Result<BalanceChangeCommand, CommandError> {
        Ok(BalanceChangeCommand {
            account_id,
            amount: Self::parse_amount(amount, OperationKind::Deposit)?,
        })
    }

    pub fn withdraw(
        account_id: AccountId,
        amount: i64,
    ) -> Result<BalanceChangeCommand, CommandError> {
        Ok(BalanceChangeCommand {
            account_id,
            amount: Self::parse_amount(amount, OperationKind::Withdraw)?,
        })
    }

    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<TransferCommand, CommandError> {
        let amount = Self::parse_amount(amount, OperationKind::Transfer)?;
        if from == to {
            return Err(CommandError::SameAccountTransfer { account_id: from });
        }
        Ok(TransferCommand { from, to, amount })
    }

    fn parse_amount(amount: i64, action: OperationKind) -> Result<Amount, CommandError> {
        Amount::new(amount).ok_or(CommandError::InvalidAmount { action, amount })
    }
}
