use hdsync_types::{
    Address, AddressMeta, Amount, HdAccountId, PrefilteredBlock, SlotId, TxId, TxIn, TxOut,
    WalletId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::retention::RetentionPolicy;

/// Wallet root as known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: WalletId,
    pub name: String,
    /// Tip at the moment the wallet was registered.
    pub created_at: SlotId,
}

/// Account state as of one applied slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub slot: SlotId,
    #[serde(default)]
    pub utxo: BTreeMap<TxIn, TxOut>,
    pub balance: Amount,
    /// Every transaction that touched the account, with the slot it landed in.
    #[serde(default)]
    pub history: BTreeMap<TxId, SlotId>,
    #[serde(default)]
    pub addresses: BTreeMap<Address, AddressMeta>,
}

impl Checkpoint {
    pub fn empty(slot: SlotId) -> Self {
        Self {
            slot,
            utxo: BTreeMap::new(),
            balance: Amount::ZERO,
            history: BTreeMap::new(),
            addresses: BTreeMap::new(),
        }
    }

    /// The checkpoint that results from applying `block` at `slot`.
    ///
    /// Outputs are added before inputs are removed so that an output created
    /// and spent inside the same block never shows up in the UTxO.
    fn successor(&self, slot: SlotId, block: &PrefilteredBlock) -> Checkpoint {
        let mut next = self.clone();
        next.slot = slot;
        for (tx_in, out) in &block.outputs {
            next.utxo.insert(*tx_in, out.clone());
        }
        for tx_in in &block.inputs {
            next.utxo.remove(tx_in);
        }
        next.balance = next.utxo.values().map(|out| out.amount).sum();
        for (tx_id, tx_slot) in &block.meta.tx_slots {
            next.history.insert(*tx_id, *tx_slot);
        }
        for (address, meta) in &block.meta.addresses {
            let entry = next.addresses.entry(address.clone()).or_default();
            *entry = entry.merge(*meta);
        }
        next
    }
}

/// An account and its rollback history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HdAccount {
    pub id: HdAccountId,
    pub name: String,
    /// Oldest first, never empty.
    checkpoints: Vec<Checkpoint>,
}

impl HdAccount {
    /// New account whose first checkpoint sits at `birth`.
    pub fn new(id: HdAccountId, name: impl Into<String>, birth: SlotId) -> Self {
        Self {
            id,
            name: name.into(),
            checkpoints: vec![Checkpoint::empty(birth)],
        }
    }

    pub fn current(&self) -> &Checkpoint {
        // Invariant: checkpoints is never empty.
        &self.checkpoints[self.checkpoints.len() - 1]
    }

    pub fn balance(&self) -> Amount {
        self.current().balance
    }

    pub fn utxo(&self) -> &BTreeMap<TxIn, TxOut> {
        &self.current().utxo
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Slot of the oldest retained checkpoint; rollbacks cannot go below it.
    pub fn oldest_slot(&self) -> SlotId {
        self.checkpoints[0].slot
    }

    pub(crate) fn apply(&mut self, slot: SlotId, block: &PrefilteredBlock, policy: &RetentionPolicy, base: SlotId) {
        let next = self.current().successor(slot, block);
        self.checkpoints.push(next);
        policy.prune_checkpoints(&mut self.checkpoints, base);
    }

    /// Drop every checkpoint newer than `target`. Returns whether anything changed.
    ///
    /// Callers must have checked `oldest_slot() <= target` beforehand.
    pub(crate) fn rollback_to(&mut self, target: SlotId) -> bool {
        let keep = self.checkpoints.partition_point(|c| c.slot <= target).max(1);
        let changed = keep < self.checkpoints.len();
        self.checkpoints.truncate(keep);
        changed
    }
}
