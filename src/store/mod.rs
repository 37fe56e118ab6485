use thiserror::Error;

use crate::account::{Account, AccountDraft, AccountId};

pub mod in_memory_store;
pub mod optimistic_store;

pub use in_memory_store::InMemoryAccountStore;
pub use optimistic_store::OptimisticAccountStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Account {id} does not exist")]
    NotFound { id: AccountId },
    #[error("Account {id} already exists")]
    AlreadyExists { id: AccountId },
    #[error("Account {id} is referenced more than once in a single update")]
    DuplicateId { id: AccountId },
    #[error("Update tried to replace account {id} with a different record")]
    IdentityChanged { id: AccountId },
    #[error("Update abandoned after {attempts} conflicting attempts")]
    ContentionExhausted { attempts: usize },
    #[error("Store is unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Durable mapping from account id to account record.
///
/// Mutators always run on [`AccountDraft`]s of the records. Drafts are
/// written back only if the mutator returns `Ok` and every draft still
/// describes the record it was taken from, so a failed update never leaves a
/// partially modified record behind. A mutator may be invoked more than
/// once per update by implementations that retry on conflicts.
pub trait AccountStore: Send + Sync {
    /// Registers a freshly opened account.
    fn insert(&self, account: Account) -> Result<(), StoreError>;

    fn get(&self, id: AccountId) -> Result<Account, StoreError>;

    /// Read-modify-write of a single record, serialized with every other
    /// update touching the same record.
    fn atomic_update<T, E, F>(&self, id: AccountId, mutator: F) -> Result<T, E>
    where
        F: FnMut(&mut AccountDraft) -> Result<T, E>,
        E: From<StoreError>;

    /// All-or-nothing read-modify-write of several records. Drafts are
    /// handed to the mutator in the order of `ids`, while exclusive access
    /// is acquired in ascending id order regardless of that order.
    fn atomic_update_many<T, E, F>(&self, ids: &[AccountId], mutator: F) -> Result<T, E>
    where
        F: FnMut(&mut [AccountDraft]) -> Result<T, E>,
        E: From<StoreError>;

    /// Snapshot of every record, ordered by id.
    fn accounts(&self) -> Vec<Account>;
}

/// Positions of `ids` sorted by ascending id. Fails on duplicates, which
/// would otherwise have a record locked (or versioned) twice.
pub(crate) fn lock_order(ids: &[AccountId]) -> Result<Vec<usize>, StoreError> {
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_unstable_by_key(|&pos| ids[pos]);
    if let Some(pair) = order.windows(2).find(|pair| ids[pair[0]] == ids[pair[1]]) {
        return Err(StoreError::DuplicateId { id: ids[pair[0]] });
    }
    Ok(order)
}

/// Turns a draft back into a record, refusing a draft that no longer
/// describes `current`, e.g. one swapped for another account's draft.
pub(crate) fn commit_draft(current: &Account, draft: AccountDraft) -> Result<Account, StoreError> {
    if current.same_identity(&draft) {
        Ok(draft.into_account())
    } else {
        Err(StoreError::IdentityChanged { id: current.id() })
    }
}

/// [`commit_draft`] over a whole update. Nothing is returned unless every
/// draft passes.
pub(crate) fn commit_drafts<'a>(
    current: impl IntoIterator<Item = &'a Account>,
    drafts: Vec<AccountDraft>,
) -> Result<Vec<Account>, StoreError> {
    current
        .into_iter()
        .zip(drafts)
        .map(|(record, draft)| commit_draft(record, draft))
        .collect()
}
