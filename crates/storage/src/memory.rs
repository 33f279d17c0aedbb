use hdsync_types::{HdAccountId, PrefilteredSlot, SlotId, WalletId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::account::HdAccount;
use crate::retention::RetentionPolicy;
use crate::state::StoreState;
use crate::{StoreError, WalletStore};

/// In-memory backend. Commands run against a staged copy which replaces the
/// live state only once the command succeeded. Block application stages just
/// the accounts named by the block; fork switches and deletions stage everything.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    policy: RetentionPolicy,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RetentionPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            policy,
        }
    }

    /// Copy of the full state, for comparisons in tests and diagnostics.
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }

    fn run<T>(&self, command: impl FnOnce(&mut StoreState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut live = self.state.write();
        let mut staged = live.clone();
        let out = command(&mut staged)?;
        *live = staged;
        Ok(out)
    }

    /// Like [`Self::run`], but stages only the cursor, the wallet records and
    /// the listed accounts. The command must not alter wallet records and
    /// reports which staged accounts it changed; only those are written back.
    fn run_partial<'a, I>(
        &self,
        ids: I,
        command: impl FnOnce(&mut StoreState) -> Result<BTreeSet<HdAccountId>, StoreError>,
    ) -> Result<BTreeSet<HdAccountId>, StoreError>
    where
        I: IntoIterator<Item = &'a HdAccountId>,
    {
        let mut live = self.state.write();
        let accounts = ids
            .into_iter()
            .filter_map(|id| live.accounts.get(id).map(|account| (*id, account.clone())))
            .collect();
        let mut staged = StoreState {
            cursor: live.cursor.clone(),
            wallets: std::mem::take(&mut live.wallets),
            accounts,
        };
        let result = command(&mut staged);
        live.wallets = std::mem::take(&mut staged.wallets);
        let touched = result?;

        live.cursor = staged.cursor;
        for id in &touched {
            if let Some(account) = staged.accounts.remove(id) {
                live.accounts.insert(*id, account);
            }
        }
        Ok(touched)
    }
}

impl WalletStore for MemoryStore {
    fn wallet_ids(&self) -> Result<Vec<WalletId>, StoreError> {
        Ok(self.state.read().wallets.keys().copied().collect())
    }

    fn tip(&self) -> Result<SlotId, StoreError> {
        Ok(self.state.read().tip())
    }

    fn max_rollback(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().max_rollback())
    }

    fn create_wallet(&self, id: WalletId, name: &str) -> Result<(), StoreError> {
        self.run(|state| state.create_wallet(id, name))
    }

    fn delete_wallet(&self, id: &WalletId) -> Result<(), StoreError> {
        self.run(|state| state.delete_wallet(id).map(|_| ()))
    }

    fn create_account(&self, id: HdAccountId, name: &str) -> Result<(), StoreError> {
        self.run_partial([&id], |state| {
            state.create_account(id, name)?;
            Ok(BTreeSet::from([id]))
        })
        .map(|_| ())
    }

    fn account(&self, id: &HdAccountId) -> Result<Option<HdAccount>, StoreError> {
        Ok(self.state.read().accounts.get(id).cloned())
    }

    fn accounts_of(&self, wallet: &WalletId) -> Result<Vec<HdAccount>, StoreError> {
        Ok(self
            .state
            .read()
            .accounts
            .values()
            .filter(|account| account.id.wallet == *wallet)
            .cloned()
            .collect())
    }

    fn apply_block(&self, block: PrefilteredSlot) -> Result<(), StoreError> {
        let touched = self.run_partial(block.accounts.keys(), |state| {
            state.apply_slot(&block, &self.policy)
        })?;
        info!(slot = %block.slot, accounts = touched.len(), "applied block");
        Ok(())
    }

    fn switch_to_fork(&self, rollback: usize, blocks: Vec<PrefilteredSlot>) -> Result<(), StoreError> {
        let tip = self.run(|state| {
            state.switch_to_fork(rollback, &blocks, &self.policy)?;
            Ok(state.tip())
        })?;
        info!(rollback, applied = blocks.len(), tip = %tip, "switched to fork");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl crate::RollbackForTests for MemoryStore {
    fn rollback(&self) -> Result<(), StoreError> {
        self.run(|state| state.rollback(1).map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdsync_types::{Address, Amount, PrefilteredBlock, TxId, TxIn, TxOut};

    const WALLET: WalletId = WalletId([3u8; 32]);

    fn paid(tag: u8, amount: u64) -> PrefilteredBlock {
        let mut block = PrefilteredBlock::default();
        block.outputs.insert(
            TxIn::new(TxId([tag; 32]), 0),
            TxOut::new(Address::plain([tag; 32]), Amount::from_atomic(amount)),
        );
        block
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_wallet(WALLET, "main").unwrap();
        for ix in 0..3 {
            store.create_account(HdAccountId::new(WALLET, ix), "acc").unwrap();
        }
        store
    }

    #[test]
    fn apply_writes_back_only_mapped_accounts() {
        let store = seeded();
        let before = store.snapshot();
        let target = HdAccountId::new(WALLET, 1);
        let block = PrefilteredSlot::new(SlotId(1), [(target, paid(1, 30))].into_iter().collect());
        store.apply_block(block).unwrap();

        let after = store.snapshot();
        assert_eq!(after.tip(), SlotId(1));
        assert_eq!(after.wallets, before.wallets);
        assert_eq!(after.accounts[&target].balance(), Amount::from_atomic(30));
        for ix in [0, 2] {
            let id = HdAccountId::new(WALLET, ix);
            assert_eq!(after.accounts[&id], before.accounts[&id]);
        }
    }

    #[test]
    fn rejected_apply_keeps_wallets_and_accounts() {
        let store = seeded();
        store
            .apply_block(PrefilteredSlot::new(SlotId(4), Default::default()))
            .unwrap();
        let before = store.snapshot();

        let block = PrefilteredSlot::new(
            SlotId(4),
            [(HdAccountId::new(WALLET, 0), paid(2, 5))].into_iter().collect(),
        );
        assert!(matches!(
            store.apply_block(block),
            Err(StoreError::NotAscending { .. })
        ));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.wallet_ids().unwrap(), vec![WALLET]);
    }

    #[test]
    fn duplicate_account_is_rejected_without_changes() {
        let store = seeded();
        let before = store.snapshot();
        assert!(matches!(
            store.create_account(HdAccountId::new(WALLET, 0), "again"),
            Err(StoreError::DuplicateAccount(_))
        ));
        assert_eq!(store.snapshot(), before);
    }
}
