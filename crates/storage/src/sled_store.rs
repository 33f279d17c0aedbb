use hdsync_types::{HdAccountId, PrefilteredSlot, SlotId, WalletId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, UnabortableTransactionError,
};
use sled::{Db, Transactional, Tree};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

use crate::account::{HdAccount, WalletRecord};
use crate::cursor::ChainCursor;
use crate::retention::RetentionPolicy;
use crate::state::StoreState;
use crate::{StoreError, WalletStore};

const CURSOR_KEY: &[u8] = b"cursor";

type Writes = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Pending mutations for one command, grouped by tree.
#[derive(Default)]
struct Commit {
    wallets: Writes,
    accounts: Writes,
    metadata: Writes,
}

impl Commit {
    fn put_cursor(&mut self, cursor: &ChainCursor) -> Result<(), StoreError> {
        self.metadata.push((CURSOR_KEY.to_vec(), Some(encode(cursor)?)));
        Ok(())
    }

    fn put_wallet(&mut self, record: &WalletRecord) -> Result<(), StoreError> {
        self.wallets.push((record.id.0.to_vec(), Some(encode(record)?)));
        Ok(())
    }

    fn remove_wallet(&mut self, id: &WalletId) {
        self.wallets.push((id.0.to_vec(), None));
    }

    fn put_account(&mut self, account: &HdAccount) -> Result<(), StoreError> {
        self.accounts
            .push((account.id.to_key_bytes().to_vec(), Some(encode(account)?)));
        Ok(())
    }

    fn remove_account(&mut self, id: &HdAccountId) {
        self.accounts.push((id.to_key_bytes().to_vec(), None));
    }

    fn put_accounts(&mut self, state: &StoreState, ids: &BTreeSet<HdAccountId>) -> Result<(), StoreError> {
        for id in ids {
            if let Some(account) = state.accounts.get(id) {
                self.put_account(account)?;
            }
        }
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode an account record, refusing one without any checkpoint.
fn decode_account(bytes: &[u8]) -> Result<HdAccount, StoreError> {
    let account: HdAccount = decode(bytes)?;
    if account.checkpoints().is_empty() {
        return Err(StoreError::CorruptKey {
            tree: "accounts",
            reason: format!("account {} has no checkpoints", account.id),
        });
    }
    Ok(account)
}

fn write_all(tree: &TransactionalTree, writes: &Writes) -> Result<(), UnabortableTransactionError> {
    for (key, value) in writes {
        match value {
            Some(value) => {
                tree.insert(key.as_slice(), value.as_slice())?;
            }
            None => {
                tree.remove(key.as_slice())?;
            }
        }
    }
    Ok(())
}

/// Sled-backed implementation
///
/// Every command is computed under a writer lock and committed with a single
/// multi-tree transaction, so a crash never exposes half of a fork switch.
pub struct SledStore {
    db: Db,
    wallets: Tree,
    accounts: Tree,
    metadata: Tree,
    policy: RetentionPolicy,
    writer: Mutex<()>,
}

impl SledStore {
    pub fn new<P: AsRef<Path>>(path: P, policy: RetentionPolicy) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?, policy)
    }

    /// Store backed by a temporary database that disappears on drop.
    pub fn temporary(policy: RetentionPolicy) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, policy)
    }

    fn from_db(db: Db, policy: RetentionPolicy) -> Result<Self, StoreError> {
        let wallets = db.open_tree("wallets")?;
        let accounts = db.open_tree("accounts")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            wallets,
            accounts,
            metadata,
            policy,
            writer: Mutex::new(()),
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn load_cursor(&self) -> Result<ChainCursor, StoreError> {
        match self.metadata.get(CURSOR_KEY)? {
            Some(bytes) => decode(&bytes),
            None => Ok(ChainCursor::default()),
        }
    }

    fn load_wallets(&self) -> Result<BTreeMap<WalletId, WalletRecord>, StoreError> {
        self.wallets
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                let record: WalletRecord = decode(&value)?;
                Ok((record.id, record))
            })
            .collect()
    }

    fn load_account(&self, id: &HdAccountId) -> Result<Option<HdAccount>, StoreError> {
        self.accounts
            .get(id.to_key_bytes())?
            .map(|value| decode_account(&value))
            .transpose()
    }

    fn load_accounts_with_prefix(&self, prefix: &[u8]) -> Result<BTreeMap<HdAccountId, HdAccount>, StoreError> {
        self.accounts
            .scan_prefix(prefix)
            .map(|entry| {
                let (key, value) = entry?;
                let id = HdAccountId::from_key_bytes(&key).map_err(|err| StoreError::CorruptKey {
                    tree: "accounts",
                    reason: err.to_string(),
                })?;
                Ok((id, decode_account(&value)?))
            })
            .collect()
    }

    /// Cursor, wallets and every account. Needed by rollbacks and fork switches.
    fn load_full_state(&self) -> Result<StoreState, StoreError> {
        Ok(StoreState {
            cursor: self.load_cursor()?,
            wallets: self.load_wallets()?,
            accounts: self.load_accounts_with_prefix(&[])?,
        })
    }

    /// Cursor, wallets and only the listed accounts (those that exist).
    fn load_partial_state<'a, I>(&self, ids: I) -> Result<StoreState, StoreError>
    where
        I: IntoIterator<Item = &'a HdAccountId>,
    {
        let mut accounts = BTreeMap::new();
        for id in ids {
            if let Some(account) = self.load_account(id)? {
                accounts.insert(*id, account);
            }
        }
        Ok(StoreState {
            cursor: self.load_cursor()?,
            wallets: self.load_wallets()?,
            accounts,
        })
    }

    fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        (&self.wallets, &self.accounts, &self.metadata)
            .transaction(|(wallets, accounts, metadata)| {
                write_all(wallets, &commit.wallets)?;
                write_all(accounts, &commit.accounts)?;
                write_all(metadata, &commit.metadata)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|err: TransactionError<()>| match err {
                TransactionError::Abort(()) => StoreError::TransactionAborted,
                TransactionError::Storage(err) => StoreError::Database(err),
            })
    }
}

impl WalletStore for SledStore {
    fn wallet_ids(&self) -> Result<Vec<WalletId>, StoreError> {
        Ok(self.load_wallets()?.into_keys().collect())
    }

    fn tip(&self) -> Result<SlotId, StoreError> {
        Ok(self.load_cursor()?.tip())
    }

    fn max_rollback(&self) -> Result<usize, StoreError> {
        Ok(self.load_full_state()?.max_rollback())
    }

    fn create_wallet(&self, id: WalletId, name: &str) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_partial_state(std::iter::empty())?;
        state.create_wallet(id, name)?;
        let mut commit = Commit::default();
        if let Some(record) = state.wallets.get(&id) {
            commit.put_wallet(record)?;
        }
        self.commit(commit)
    }

    fn delete_wallet(&self, id: &WalletId) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_full_state()?;
        let removed = state.delete_wallet(id)?;
        let mut commit = Commit::default();
        commit.remove_wallet(id);
        for account in &removed {
            commit.remove_account(account);
        }
        self.commit(commit)
    }

    fn create_account(&self, id: HdAccountId, name: &str) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_partial_state(&[id])?;
        state.create_account(id, name)?;
        let mut commit = Commit::default();
        commit.put_accounts(&state, &BTreeSet::from([id]))?;
        self.commit(commit)
    }

    fn account(&self, id: &HdAccountId) -> Result<Option<HdAccount>, StoreError> {
        self.load_account(id)
    }

    fn accounts_of(&self, wallet: &WalletId) -> Result<Vec<HdAccount>, StoreError> {
        Ok(self
            .load_accounts_with_prefix(wallet.as_bytes())?
            .into_values()
            .collect())
    }

    fn apply_block(&self, block: PrefilteredSlot) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_partial_state(block.accounts.keys())?;
        let touched = state.apply_slot(&block, &self.policy)?;

        let mut commit = Commit::default();
        commit.put_cursor(&state.cursor)?;
        commit.put_accounts(&state, &touched)?;
        self.commit(commit)?;
        info!(slot = %block.slot, accounts = touched.len(), "applied block");
        Ok(())
    }

    fn switch_to_fork(&self, rollback: usize, blocks: Vec<PrefilteredSlot>) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_full_state()?;
        let touched = state.switch_to_fork(rollback, &blocks, &self.policy)?;

        let mut commit = Commit::default();
        commit.put_cursor(&state.cursor)?;
        commit.put_accounts(&state, &touched)?;
        self.commit(commit)?;
        info!(rollback, applied = blocks.len(), tip = %state.tip(), "switched to fork");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl crate::RollbackForTests for SledStore {
    fn rollback(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock();
        let mut state = self.load_full_state()?;
        let touched = state.rollback(1)?;

        let mut commit = Commit::default();
        commit.put_cursor(&state.cursor)?;
        commit.put_accounts(&state, &touched)?;
        self.commit(commit)
    }
}
