//! Backend-independent command semantics.
//!
//! Both backends load (part of) their state into a [`StoreState`], run the
//! command against it and persist the touched entries only if the command
//! succeeded. A failed command therefore never leaves partial effects.

use hdsync_types::{HdAccountId, PrefilteredSlot, SlotId, WalletId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::account::{HdAccount, WalletRecord};
use crate::cursor::ChainCursor;
use crate::retention::RetentionPolicy;
use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreState {
    pub cursor: ChainCursor,
    pub wallets: BTreeMap<WalletId, WalletRecord>,
    pub accounts: BTreeMap<HdAccountId, HdAccount>,
}

impl StoreState {
    pub fn tip(&self) -> SlotId {
        self.cursor.tip()
    }

    pub fn create_wallet(&mut self, id: WalletId, name: &str) -> Result<(), StoreError> {
        if self.wallets.contains_key(&id) {
            return Err(StoreError::DuplicateWallet(id));
        }
        let record = WalletRecord {
            id,
            name: name.to_string(),
            created_at: self.tip(),
        };
        self.wallets.insert(id, record);
        Ok(())
    }

    /// Remove a wallet and its accounts. Returns the removed account ids.
    pub fn delete_wallet(&mut self, id: &WalletId) -> Result<Vec<HdAccountId>, StoreError> {
        if self.wallets.remove(id).is_none() {
            return Err(StoreError::UnknownWallet(*id));
        }
        let removed: Vec<HdAccountId> = self
            .accounts
            .keys()
            .filter(|account| account.wallet == *id)
            .copied()
            .collect();
        for account in &removed {
            self.accounts.remove(account);
        }
        Ok(removed)
    }

    pub fn create_account(&mut self, id: HdAccountId, name: &str) -> Result<(), StoreError> {
        if !self.wallets.contains_key(&id.wallet) {
            return Err(StoreError::UnknownWallet(id.wallet));
        }
        if self.accounts.contains_key(&id) {
            return Err(StoreError::DuplicateAccount(id));
        }
        let account = HdAccount::new(id, name, self.tip());
        self.accounts.insert(id, account);
        Ok(())
    }

    /// Largest rollback that keeps every account at or above its oldest checkpoint.
    pub fn max_rollback(&self) -> usize {
        self.accounts
            .values()
            .map(|account| self.cursor.max_rollback_above(account.oldest_slot()))
            .fold(self.cursor.max_rollback(), usize::min)
    }

    /// Apply one prefiltered block. Returns the accounts whose state changed.
    ///
    /// Accounts of wallets unknown to the store (deleted concurrently, for
    /// instance) are skipped. Accounts of known wallets that do not exist yet
    /// were empty since the wallet was registered, so their birth checkpoint
    /// sits at the wallet's registration slot (capped at the previous tip) and
    /// does not narrow the rollback window.
    pub fn apply_slot(
        &mut self,
        block: &PrefilteredSlot,
        policy: &RetentionPolicy,
    ) -> Result<BTreeSet<HdAccountId>, StoreError> {
        let previous_tip = self.tip();
        self.cursor.advance(block.slot, policy)?;
        let base = self.cursor.base();

        let mut touched = BTreeSet::new();
        for (id, prefiltered) in &block.accounts {
            let Some(wallet) = self.wallets.get(&id.wallet) else {
                debug!(account = %id, slot = %block.slot, "dropping update for unknown wallet");
                continue;
            };
            let birth = wallet.created_at.min(previous_tip);
            let account = self.accounts.entry(*id).or_insert_with(|| {
                debug!(account = %id, slot = %block.slot, birth = %birth, "discovered account");
                HdAccount::new(*id, format!("account {}", id.ix.0), birth)
            });
            account.apply(block.slot, prefiltered, policy, base);
            touched.insert(*id);
        }
        Ok(touched)
    }

    /// Roll back `n` blocks. Returns the accounts whose state changed.
    pub fn rollback(&mut self, n: usize) -> Result<BTreeSet<HdAccountId>, StoreError> {
        let available = self.max_rollback();
        if n > available {
            return Err(StoreError::RollbackDuringRestoration {
                requested: n,
                available,
            });
        }
        let target = self.cursor.rollback(n)?;
        let mut touched = BTreeSet::new();
        for (id, account) in self.accounts.iter_mut() {
            if account.rollback_to(target) {
                touched.insert(*id);
            }
        }
        Ok(touched)
    }

    /// Roll back `n` blocks and apply `blocks` in order.
    ///
    /// The fork must be at least as long as the discarded segment.
    pub fn switch_to_fork(
        &mut self,
        n: usize,
        blocks: &[PrefilteredSlot],
        policy: &RetentionPolicy,
    ) -> Result<BTreeSet<HdAccountId>, StoreError> {
        if blocks.len() < n {
            return Err(StoreError::ForkTooShort {
                rollback: n,
                fork_len: blocks.len(),
            });
        }
        let mut touched = self.rollback(n)?;
        for block in blocks {
            touched.extend(self.apply_slot(block, policy)?);
        }
        Ok(touched)
    }
}
