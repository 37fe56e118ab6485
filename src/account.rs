use std::{fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::Amount;

pub type AccountId = u64;
pub type OwnerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Rub,
}

impl Currency {
    /// Number of minor-unit digits, i.e. cents for USD.
    pub fn minor_digits(self) -> u32 {
        match self {
            Currency::Usd | Currency::Eur | Currency::Rub => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEventKind {
    Deposited,
    Withdrawn,
    TransferredOut { to: AccountId },
    TransferredIn { from: AccountId },
}

#[derive(Debug, Clone, Copy)]
pub struct AccountEvent {
    account_id: AccountId,
    amount: Amount,
    kind: AccountEventKind,
}

impl AccountEvent {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn kind(&self) -> AccountEventKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient funds on account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        available: u64,
        requested: Amount,
    },
    #[error("Cannot transfer between {from} and {to} accounts")]
    CurrencyMismatch { from: Currency, to: Currency },
    #[error("Balance of account {account_id} would overflow")]
    BalanceOverflow { account_id: AccountId },
}

/// Account record. Identity, owner and currency never change, the balance
/// only changes by applying events produced by the `handle_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    owner_id: OwnerId,
    currency: Currency,
    amount: u64,
}

/// Working copy of an account handed to store mutators. It can be read
/// freely, but only this crate can change the balance behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDraft {
    account: Account,
}

impl AccountDraft {
    pub(crate) fn new(account: Account) -> Self {
        Self { account }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub(crate) fn apply(&mut self, event: &AccountEvent) {
        self.account.apply(event);
    }

    pub(crate) fn into_account(self) -> Account {
        self.account
    }
}

impl Deref for AccountDraft {
    type Target = Account;

    fn deref(&self) -> &Account {
        &self.account
    }
}

impl Account {
    /// True when `other` is the same record: same id, owner and currency.
    pub(crate) fn same_identity(&self, other: &Account) -> bool {
        self.id == other.id && self.owner_id == other.owner_id && self.currency == other.currency
    }

    pub fn new(id: AccountId, owner_id: OwnerId, currency: Currency, amount: u64) -> Self {
        Self {
            id,
            owner_id,
            currency,
            amount,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Balance in minor units.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub(crate) fn apply(&mut self, event: &AccountEvent) {
        debug_assert_eq!(event.account_id, self.id);
        match event.kind {
            AccountEventKind::Deposited | AccountEventKind::TransferredIn { .. } => {
                self.amount += event.amount.get();
            }
            AccountEventKind::Withdrawn | AccountEventKind::TransferredOut { .. } => {
                self.amount -= event.amount.get();
            }
        }
    }

    pub fn handle_deposit(&self, amount: Amount) -> Result<AccountEvent, AccountError> {
        self.credit(amount, AccountEventKind::Deposited)
    }

    pub fn handle_withdraw(&self, amount: Amount) -> Result<AccountEvent, AccountError> {
        self.debit(amount, AccountEventKind::Withdrawn)
    }

    /// Returns the (source, destination) event pair. Nothing is produced
    /// unless both legs are valid.
    pub fn handle_transfer(
        &self,
        destination: &Account,
        amount: Amount,
    ) -> Result<(AccountEvent, AccountEvent), AccountError> {
        if self.currency != destination.currency {
            return Err(AccountError::CurrencyMismatch {
                from: self.currency,
                to: destination.currency,
            });
        }
        let outgoing = self.debit(
            amount,
            AccountEventKind::TransferredOut { to: destination.id },
        )?;
        let incoming = destination.credit(amount, AccountEventKind::TransferredIn { from: self.id })?;
        Ok((outgoing, incoming))
    }

    fn credit(&self, amount: Amount, kind: AccountEventKind) -> Result<AccountEvent, AccountError> {
        if self.amount.checked_add(amount.get()).is_none() {
            return Err(AccountError::BalanceOverflow {
                account_id: self.id,
            });
        }
        Ok(AccountEvent {
            account_id: self.id,
            amount,
            kind,
        })
    }

    fn debit(&self, amount: Amount, kind: AccountEventKind) -> Result<AccountEvent, AccountError> {
        if self.amount < amount.get() {
            return Err(AccountError::InsufficientFunds {
                account_id: self.id,
                available: self.amount,
                requested: amount,
            });
        }
        Ok(AccountEvent {
            account_id: self.id,
            amount,
            kind,
        })
    }
}
