use std::io::Write;

use crate::account::{Account, AccountId, Currency, OwnerId};
use anyhow::{Context, Result};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub account: AccountId,
    pub owner: OwnerId,
    pub currency: Currency,
    /// In major units, e.g. dollars rather than cents.
    pub balance: Decimal,
}

impl From<&Account> for AccountRow {
    fn from(acc: &Account) -> Self {
        Self {
            account: acc.id(),
            owner: acc.owner_id(),
            currency: acc.currency(),
            balance: Decimal::from_i128_with_scale(
                i128::from(acc.amount()),
                acc.currency().minor_digits(),
            ),
        }
    }
}

/// Writes the balance report, header first.
pub fn print_accounts<W>(output: &mut W, rows: impl Iterator<Item = AccountRow>) -> Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        let account = row.account;
        writer
            .serialize(row)
            .with_context(|| format!("Cannot report balance of account {account}"))?;
    }
    writer.flush().context("Cannot flush balance report")
}
