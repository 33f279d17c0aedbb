use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::address::Address;
use crate::amount::Amount;
use crate::ids::{HdAccountId, SlotId};
use crate::transaction::{TxId, TxIn, TxOut};

/// What a block tells an account about one of its addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressMeta {
    /// The address received coins in this block.
    pub used: bool,
    /// The address received coins from a transaction that also spent from the same account.
    pub change: bool,
}

impl AddressMeta {
    pub fn merge(self, other: AddressMeta) -> AddressMeta {
        AddressMeta {
            used: self.used || other.used,
            change: self.change || other.change,
        }
    }
}

/// Per-account metadata extracted from a block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Transactions touching the account and the slot they were seen in.
    #[serde(default)]
    pub tx_slots: BTreeMap<TxId, SlotId>,
    #[serde(default)]
    pub addresses: BTreeMap<Address, AddressMeta>,
}

impl BlockMeta {
    pub fn is_empty(&self) -> bool {
        self.tx_slots.is_empty() && self.addresses.is_empty()
    }

    pub fn record_tx(&mut self, tx_id: TxId, slot: SlotId) {
        self.tx_slots.insert(tx_id, slot);
    }

    pub fn record_address(&mut self, address: Address, meta: AddressMeta) {
        let entry = self.addresses.entry(address).or_default();
        *entry = entry.merge(meta);
    }

    /// Fold a later block's metadata into this one.
    pub fn extend(&mut self, other: &BlockMeta) {
        for (tx_id, slot) in &other.tx_slots {
            self.tx_slots.insert(*tx_id, *slot);
        }
        for (address, meta) in &other.addresses {
            self.record_address(address.clone(), *meta);
        }
    }
}

/// The projection of a resolved block onto one account.
///
/// Built once per (block, account) pair and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrefilteredBlock {
    /// Outpoints owned by the account that the block spends.
    #[serde(default)]
    pub inputs: BTreeSet<TxIn>,
    /// New outputs paying the account.
    #[serde(default)]
    pub outputs: BTreeMap<TxIn, TxOut>,
    #[serde(default)]
    pub meta: BlockMeta,
}

impl PrefilteredBlock {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.meta.is_empty()
    }

    /// Total value of the outputs paying the account.
    pub fn received(&self) -> Amount {
        self.outputs.values().map(|out| out.amount).sum()
    }
}

/// Prefiltered views of a single block, keyed by account.
pub type AccountMap = BTreeMap<HdAccountId, PrefilteredBlock>;

/// A block after prefiltering: its slot plus the per-account views.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefilteredSlot {
    pub slot: SlotId,
    pub accounts: AccountMap,
}

impl PrefilteredSlot {
    pub fn new(slot: SlotId, accounts: AccountMap) -> Self {
        Self { slot, accounts }
    }
}
