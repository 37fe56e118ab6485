use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{trace, warn};

use crate::account::{Account, AccountDraft, AccountId};

use super::{AccountStore, StoreError, commit_drafts, lock_order};

struct VersionedAccount {
    version: u64,
    account: Account,
}

type Record = Arc<Mutex<VersionedAccount>>;

/// Compare-and-set store. Mutators run against a snapshot without holding
/// any lock. The commit locks only the records being updated, in ascending
/// id order, re-checks their versions and retries the whole
/// read-modify-write when another update won the race.
pub struct OptimisticAccountStore {
    records: RwLock<HashMap<AccountId, Record>>,
    max_retries: usize,
}

impl Default for OptimisticAccountStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES)
    }
}

impl OptimisticAccountStore {
    pub const DEFAULT_MAX_RETRIES: usize = 16;

    pub fn new(max_retries: usize) -> Self {
        Self {
            records: RwLock::default(),
            max_retries,
        }
    }

    /// Current version of a record, bumped on every committed update.
    pub fn version(&self, id: AccountId) -> Result<u64, StoreError> {
        Ok(self.record(id)?.lock().version)
    }

    fn record(&self, id: AccountId) -> Result<Record, StoreError> {
        self.records
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    fn snapshot(records: &[Record]) -> (Vec<u64>, Vec<AccountDraft>) {
        records
            .iter()
            .map(|record| {
                let record = record.lock();
                (record.version, AccountDraft::new(record.account.clone()))
            })
            .unzip()
    }

    /// Writes drafts back if no record changed since `versions` were read.
    fn try_commit(
        records: &[Record],
        order: &[usize],
        versions: &[u64],
        drafts: Vec<AccountDraft>,
    ) -> Result<bool, StoreError> {
        let mut guards: Vec<(usize, MutexGuard<'_, VersionedAccount>)> = order
            .iter()
            .map(|&pos| (pos, records[pos].lock()))
            .collect();
        guards.sort_unstable_by_key(|(pos, _)| *pos);

        let unchanged = guards
            .iter()
            .zip(versions)
            .all(|((_, record), version)| record.version == *version);
        if !unchanged {
            return Ok(false);
        }
        let committed = commit_drafts(guards.iter().map(|(_, record)| &record.account), drafts)?;
        for ((_, record), account) in guards.iter_mut().zip(committed) {
            record.version += 1;
            record.account = account;
        }
        Ok(true)
    }
}

impl AccountStore for OptimisticAccountStore {
    fn insert(&self, account: Account) -> Result<(), StoreError> {
        match self.records.write().entry(account.id()) {
            Entry::Occupied(entry) => Err(StoreError::AlreadyExists { id: *entry.key() }),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(VersionedAccount {
                    version: 0,
                    account,
                })));
                Ok(())
            }
        }
    }

    fn get(&self, id: AccountId) -> Result<Account, StoreError> {
        Ok(self.record(id)?.lock().account.clone())
    }

    fn atomic_update<T, E, F>(&self, id: AccountId, mut mutator: F) -> Result<T, E>
    where
        F: FnMut(&mut AccountDraft) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.atomic_update_many(&[id], |accounts| mutator(&mut accounts[0]))
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

        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            let (versions, mut drafts) = Self::snapshot(&records);
            let output = mutator(&mut drafts)?;
            if Self::try_commit(&records, &order, &versions, drafts)? {
                return Ok(output);
            }
            trace!(?ids, attempt, "version conflict, retrying update");
        }
        warn!(?ids, attempts, "giving up on contended update");
        Err(StoreError::ContentionExhausted { attempts }.into())
    }

    fn accounts(&self) -> Vec<Account> {
        let mut records: Vec<(AccountId, Record)> = self
            .records
            .read()
            .iter()
            .map(|(id, record)| (*id, Arc::clone(record)))
            .collect();
        records.sort_unstable_by_key(|(id, _)| *id);

        let guards: Vec<MutexGuard<'_, VersionedAccount>> =
            records.iter().map(|(_, record)| record.lock()).collect();
        guards.iter().map(|record| record.account.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, sync::mpsc, thread, time::Duration};

    use crate::account::Currency;

    use super::*;

    fn store(max_retries: usize) -> OptimisticAccountStore {
        let store = OptimisticAccountStore::new(max_retries);
        store
            .insert(Account::new(1, 10, Currency::Usd, 100))
            .unwrap();
        store
            .insert(Account::new(2, 20, Currency::Usd, 50))
            .unwrap();
        store
            .insert(Account::new(3, 30, Currency::Usd, 0))
            .unwrap();
        store
    }

    fn with_amount(acc: &Account, amount: u64) -> AccountDraft {
        AccountDraft::new(Account::new(acc.id(), acc.owner_id(), acc.currency(), amount))
    }

    #[test]
    fn commit_bumps_version() {
        let store = store(0);
        assert_eq!(store.version(1).unwrap(), 0);
        store
            .atomic_update(1, |acc| {
                *acc = with_amount(acc, 1);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert_eq!(store.version(1).unwrap(), 1);
        assert_eq!(store.version(2).unwrap(), 0);
        assert_eq!(store.get(1).unwrap().amount(), 1);
    }

    #[test]
    fn failed_mutator_leaves_version_untouched() {
        let store = store(3);
        let res: Result<(), StoreError> = store.atomic_update_many(&[1, 2], |accs| {
            accs[0] = with_amount(&accs[0], 0);
            Err(StoreError::Unavailable {
                reason: "test".into(),
            })
        });
        assert!(res.is_err());
        assert_eq!(store.version(1).unwrap(), 0);
        assert_eq!(store.get(1).unwrap().amount(), 100);
    }

    #[test]
    fn update_cannot_replace_the_record() {
        let store = store(3);
        let res = store.atomic_update(1, |acc| {
            *acc = AccountDraft::new(Account::new(7, 99, Currency::Eur, 1_000_000));
            Ok::<_, StoreError>(())
        });
        assert_eq!(res.unwrap_err(), StoreError::IdentityChanged { id: 1 });
        assert_eq!(store.get(1).unwrap(), Account::new(1, 10, Currency::Usd, 100));
        assert_eq!(store.version(1).unwrap(), 0);

        let res = store.atomic_update_many(&[2, 1], |accs| {
            accs.swap(0, 1);
            Ok::<_, StoreError>(())
        });
        assert_eq!(res.unwrap_err(), StoreError::IdentityChanged { id: 2 });
        assert_eq!(store.get(1).unwrap().amount(), 100);
        assert_eq!(store.get(2).unwrap().amount(), 50);
        assert_eq!(store.version(2).unwrap(), 0);
    }

    #[test]
    fn conflicting_commit_is_retried() {
        let store = store(2);
        let calls = Cell::new(0);
        store
            .atomic_update(1, |acc| {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    // a competing writer sneaks in between snapshot and commit
                    store
                        .atomic_update(1, |other| {
                            *other = with_amount(other, 40);
                            Ok::<_, StoreError>(())
                        })
                        .unwrap();
                }
                *acc = with_amount(acc, acc.amount() + 1);
                Ok::<_, StoreError>(())
            })
            .unwrap();
        assert_eq!(calls.get(), 2);
        // applied on top of the competing write, not the stale snapshot
        assert_eq!(store.get(1).unwrap().amount(), 41);
    }

    #[test]
    fn contention_exhausted() {
        let store = store(1);
        let res: Result<(), StoreError> = store.atomic_update(1, |acc| {
            store
                .atomic_update(1, |other| {
                    *other = with_amount(other, other.amount() + 1);
                    Ok::<_, StoreError>(())
                })
                .unwrap();
            *acc = with_amount(acc, 0);
            Ok(())
        });
        assert_eq!(
            res.unwrap_err(),
            StoreError::ContentionExhausted { attempts: 2 }
        );
        // only the competing writes landed
        assert_eq!(store.get(1).unwrap().amount(), 102);
    }

    #[test]
    fn held_record_does_not_block_others() {
        let store = Arc::new(store(0));
        let held = store.record(1).unwrap();
        let _guard = held.lock();

        let (done, finished) = mpsc::channel();
        let writer = Arc::clone(&store);
        thread::spawn(move || {
            let res = writer.atomic_update_many(&[3, 2], |accs| {
                accs[0] = with_amount(&accs[0], 50);
                accs[1] = with_amount(&accs[1], 0);
                Ok::<_, StoreError>(())
            });
            done.send(res).unwrap();
        });
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("update of accounts 2 and 3 waited on account 1")
            .unwrap();
        assert_eq!(store.get(3).unwrap().amount(), 50);
        assert_eq!(store.version(2).unwrap(), 1);
    }

    #[test]
    fn missing_and_duplicate_ids() {
        let store = store(0);
        let res: Result<(), StoreError> = store.atomic_update_many(&[1, 4], |_| Ok(()));
        assert_eq!(res.unwrap_err(), StoreError::NotFound { id: 4 });
        let res: Result<(), StoreError> = store.atomic_update_many(&[1, 1], |_| Ok(()));
        assert_eq!(res.unwrap_err(), StoreError::DuplicateId { id: 1 });
        assert_eq!(
            store
                .insert(Account::new(2, 0, Currency::Eur, 0))
                .unwrap_err(),
            StoreError::AlreadyExists { id: 2 }
        );
    }
}
