use tracing::{debug, warn};

use crate::{
    account::{Account, AccountId},
    command::{AccountCommand, BalanceChangeCommand, OperationKind, OperationRequest, TransferCommand},
    store::{AccountStore, StoreError},
};

use super::{EngineError, OperationOutcome};

/// Applies deposits, withdrawals and transfers on top of an [`AccountStore`].
///
/// Every balance check happens inside the store's atomic update, against
/// the balance that is about to be overwritten. Transfers go through
/// [`AccountStore::atomic_update_many`], which takes both records in
/// ascending id order, so opposite transfers between the same pair of
/// accounts cannot deadlock.
///
/// The engine holds no state besides the store and can be shared between
/// threads as is.
pub struct BalanceEngine<S> {
    store: S,
}

impl<S> BalanceEngine<S>
where
    S: AccountStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn account(&self, account_id: AccountId) -> Result<Account, EngineError> {
        Ok(self.store.get(account_id)?)
    }

    pub fn deposit(&self, account_id: AccountId, amount: i64) -> Result<Account, EngineError> {
        AccountCommand::deposit(account_id, amount)
            .map_err(EngineError::from)
            .and_then(|command| self.apply_deposit(command))
            .inspect_err(|err| log_rejection(OperationKind::Deposit, err))
    }

    pub fn withdraw(&self, account_id: AccountId, amount: i64) -> Result<Account, EngineError> {
        AccountCommand::withdraw(account_id, amount)
            .map_err(EngineError::from)
            .and_then(|command| self.apply_withdraw(command))
            .inspect_err(|err| log_rejection(OperationKind::Withdraw, err))
    }

    /// Returns the (source, destination) snapshots after the transfer.
    pub fn transfer(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: i64,
    ) -> Result<(Account, Account), EngineError> {
        AccountCommand::transfer(from_account_id, to_account_id, amount)
            .map_err(EngineError::from)
            .and_then(|command| self.apply_transfer(command))
            .inspect_err(|err| log_rejection(OperationKind::Transfer, err))
    }

    pub fn execute(&self, request: OperationRequest) -> Result<OperationOutcome, EngineError> {
        let action = request.kind();
        request
            .validate()
            .map_err(EngineError::from)
            .and_then(|command| match command {
                AccountCommand::Deposit(command) => {
                    self.apply_deposit(command).map(OperationOutcome::Deposited)
                }
                AccountCommand::Withdraw(command) => {
                    self.apply_withdraw(command).map(OperationOutcome::Withdrawn)
                }
                AccountCommand::Transfer(command) => self
                    .apply_transfer(command)
                    .map(|(from, to)| OperationOutcome::Transferred { from, to }),
            })
            .inspect_err(|err| log_rejection(action, err))
    }

    fn apply_deposit(&self, command: BalanceChangeCommand) -> Result<Account, EngineError> {
        let account = self.store.atomic_update(command.account_id, |account| {
            let event = account.handle_deposit(command.amount)?;
            account.apply(&event);
            Ok::<_, EngineError>(account.account().clone())
        })?;
        debug!(
            account_id = account.id(),
            amount = command.amount.get(),
            balance = account.amount(),
            "deposit applied"
        );
        Ok(account)
    }

    fn apply_withdraw(&self, command: BalanceChangeCommand) -> Result<Account, EngineError> {
        let account = self.store.atomic_update(command.account_id, |account| {
            let event = account.handle_withdraw(command.amount)?;
            account.apply(&event);
            Ok::<_, EngineError>(account.account().clone())
        })?;
        debug!(
            account_id = account.id(),
            amount = command.amount.get(),
            balance = account.amount(),
            "withdrawal applied"
        );
        Ok(account)
    }

    fn apply_transfer(&self, command: TransferCommand) -> Result<(Account, Account), EngineError> {
        let (from, to) = self
            .store
            .atomic_update_many(&[command.from, command.to], |accounts| {
                let drafts = accounts.len();
                match accounts {
                    [source, destination] => {
                        let (outgoing, incoming) =
                            source.handle_transfer(destination.account(), command.amount)?;
                        source.apply(&outgoing);
                        destination.apply(&incoming);
                        Ok::<_, EngineError>((
                            source.account().clone(),
                            destination.account().clone(),
                        ))
                    }
                    _ => Err(StoreError::Unavailable {
                        reason: format!("expected 2 records for a transfer, got {drafts}"),
                    }
                    .into()),
                }
            })?;
        debug!(
            from_account_id = from.id(),
            to_account_id = to.id(),
            amount = command.amount.get(),
            from_balance = from.amount(),
            to_balance = to.amount(),
            "transfer applied"
        );
        Ok((from, to))
    }
}

fn log_rejection(action: OperationKind, err: &EngineError) {
    warn!(?action, kind = %err.kind(), error = %err, "operation rejected");
}
