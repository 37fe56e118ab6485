use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::account::{Account, AccountDraft, AccountId};

use super::{AccountStore, StoreError, commit_draft, commit_drafts, lock_order};

/// Pessimistic store: every record sits behind its own mutex, the index
/// lock is only held while resolving ids. Updates on disjoint accounts
/// never wait for each other.
#[derive(Default)]
pub struct InMemoryAccountStore {
    records: RwLock<HashMap<AccountId, Arc<Mutex<Account>>>>,
}

impl InMemoryAccountStore {
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Result<Self, StoreError> {
        let store = Self::default();
        for account in accounts {
            store.insert(account)?;
        }
        Ok(store)
    }

    fn record(&self, id: AccountId) -> Result<Arc<Mutex<Account>>, StoreError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }
}

impl AccountStore for InMemoryAccountStore {
    fn insert(&self, account: Account) -> Result<(), StoreError> {
        match self.records.write().entry(account.id()) {
            Entry::Occupied(entry) => Err(StoreError::AlreadyExists { id: *entry.key() }),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(account)));
                Ok(())
            }
        }
    }

    fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        Ok(self.record(id)?.lock().clone())
    }

    fn atomic_update<T, E, F>(&self, id: AccountId, mut mutator: F) -> Result<T, E>
    where
        F: FnMut(&mut AccountDraft) -> Result<T, E>,
        E: From<StoreError>,
    {
        let record = self.record(id)?;
        let mut current = record.lock();
        let mut draft = AccountDraft::new(current.clone());
        let output = mutator(&mut draft)?;
        *current = commit_draft(&current, draft)?;
        Ok(output)
    }

    fn atomic_update_many<T, E, F>(&self, ids: &[AccountId], mut mutator: F) -> Result<T, E>
    where
        F: FnMut(&mut [AccountDraft]) -> Result<T, E>,
        E: From<StoreError>,
    {
        let order = lock_order(ids)?;
        let records = ids
            .iter()
            .map(|&id| self.record(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut guards: Vec<(usize, MutexGuard<'_, Account>)> = order
            .into_iter()
            .map(|pos| (pos, records[pos].lock()))
            .collect();
        // back to caller order, all locks are held at this point
        guards.sort_unstable_by_key(|(pos, _)| *pos);

        let mut drafts: Vec<AccountDraft> = guards
            .iter()
            .map(|(_, guard)| AccountDraft::new((**guard).clone()))
            .collect();
        let output = mutator(&mut drafts)?;
        let committed = commit_drafts(guards.iter().map(|(_, guard)| &**guard), drafts)?;
        for ((_, guard), account) in guards.iter_mut().zip(committed) {
            **guard = account;
        }
        Ok(output)
    }

    fn accounts(&self) -> Vec<Account> {
        let mut records: Vec<(AccountId, Arc<Mutex<Account>>)> = self
            .records
            .read()
            .iter()
            .map(|(id, record)| (*id, Arc::clone(record)))
            .collect();
        records.sort_unstable_by_key(|(id, _)| *id);

        // hold every lock at once so an in-flight transfer is seen either
        // fully applied or not at all
        let guards: Vec<MutexGuard<'_, Account>> =
            records.iter().map(|(_, record)| record.lock()).collect();
        guards.iter().map(|guard| (**guard).clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use crate::account::Currency;

    use super::*;

    fn store() -> InMemoryAccountStore {
        InMemoryAccountStore::with_accounts([
            Account::new(1, 10, Currency::Usd, 100),
            Account::new(2, 20, Currency::Usd, 50),
            Account::new(3, 30, Currency::Eur, 0),
        ])
        .unwrap()
    }

    fn with_amount(acc: &Account, amount: u64) -> AccountDraft {
        AccountDraft::new(Account::new(acc.id(), acc.owner_id(), acc.currency(), amount))
    }

    #[test]
    fn insert_and_get() {
        let store = store();
        assert_eq!(store.get(2).unwrap().amount(), 50);
        assert_eq!(store.get(4).unwrap_err(), StoreError::NotFound { id: 4 });

        let err = store
            .insert(Account::new(1, 99, Currency::Rub, 0))
            .unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists { id: 1 });
        // original record untouched
        assert_eq!(store.get(1).unwrap().owner_id(), 10);
    }

    #[test]
    fn update_commits_only_on_success() {
        let store = store();
        let err: Result<(), StoreError> = store.atomic_update(1, |acc| {
            *acc = with_amount(acc, 0);
            Err(StoreError::Unavailable {
                reason: "test".into(),
            })
        });
        assert!(err.is_err());
        assert_eq!(store.get(1).unwrap().amount(), 100);

        store
            .atomic_update(1, |acc| {
                *acc = with_amount(acc, 7);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert_eq!(store.get(1).unwrap().amount(), 7);
    }

    #[test]
    fn update_cannot_replace_the_record() {
        let store = store();
        let res = store.atomic_update(1, |acc| {
            *acc = AccountDraft::new(Account::new(7, 99, Currency::Eur, 1_000_000));
            Ok::<_, StoreError>(())
        });
        assert_eq!(res.unwrap_err(), StoreError::IdentityChanged { id: 1 });
        assert_eq!(store.get(1).unwrap(), Account::new(1, 10, Currency::Usd, 100));
        assert_eq!(store.get(7).unwrap_err(), StoreError::NotFound { id: 7 });

        let res = store.atomic_update_many(&[1, 2], |accs| {
            accs.swap(0, 1);
            Ok::<_, StoreError>(())
        });
        assert_eq!(res.unwrap_err(), StoreError::IdentityChanged { id: 1 });
        assert_eq!(store.get(1).unwrap().amount(), 100);
        assert_eq!(store.get(2).unwrap().amount(), 50);
    }

    #[test]
    fn update_many_preserves_caller_order() {
        let store = store();
        let ids = store
            .atomic_update_many(&[3, 1], |accs| {
                Ok::<_, StoreError>(accs.iter().map(|acc| acc.id()).collect::<Vec<_>>())
            })
            .unwrap();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn update_many_is_all_or_nothing() {
        let store = store();
        let res: Result<(), StoreError> = store.atomic_update_many(&[1, 4], |_| Ok(()));
        assert_eq!(res.unwrap_err(), StoreError::NotFound { id: 4 });

        let res: Result<(), StoreError> = store.atomic_update_many(&[2, 1], |accs| {
            accs[0] = with_amount(&accs[0], 0);
            Err(StoreError::Unavailable {
                reason: "second leg".into(),
            })
        });
        assert!(res.is_err());
        assert_eq!(store.get(2).unwrap().amount(), 50);

        let res: Result<(), StoreError> = store.atomic_update_many(&[2, 2], |_| Ok(()));
        assert_eq!(res.unwrap_err(), StoreError::DuplicateId { id: 2 });
    }

    #[test]
    fn held_record_does_not_block_others() {
        let store = Arc::new(store());
        let held = store.record(1).unwrap();
        let _guard = held.lock();

        let (done, finished) = mpsc::channel();
        let writer = Arc::clone(&store);
        thread::spawn(move || {
            let res = writer.atomic_update_many(&[3, 2], |accs| {
                accs[1] = with_amount(&accs[1], 0);
                Ok::<_, StoreError>(())
            });
            done.send(res).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("update of accounts 2 and 3 waited on account 1")
            .unwrap();
        assert_eq!(store.get(2).unwrap().amount(), 0);
    }

    #[test]
    fn accounts_are_sorted_by_id() {
        let store = store();
        let ids: Vec<_> = store.accounts().iter().map(Account::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
