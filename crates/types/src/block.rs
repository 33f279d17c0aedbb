use serde::{Deserialize, Serialize};

use crate::ids::{digest_id, SlotId, ID_BYTES};
use crate::transaction::{ResolvedTx, TxId};

const BLOCK_HASH_DOMAIN: &[u8] = b"hdsync-block";

digest_id!(
    /// Canonical block identifier.
    BlockHash
);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; ID_BYTES]);
}

/// A block whose transaction inputs are already resolved against the outputs they spend.
///
/// Produced by the node layer; the wallet only ever reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBlock {
    /// Chain position of the block.
    pub slot: SlotId,
    /// Hash of the preceding block on the same fork.
    pub prev_hash: BlockHash,
    /// Transactions in block order.
    #[serde(default)]
    pub transactions: Vec<ResolvedTx>,
}

impl ResolvedBlock {
    pub fn new(slot: SlotId, prev_hash: BlockHash, transactions: Vec<ResolvedTx>) -> Self {
        Self {
            slot,
            prev_hash,
            transactions,
        }
    }

    /// Block with no transactions (an occupied slot that paid nobody).
    pub fn empty(slot: SlotId, prev_hash: BlockHash) -> Self {
        Self::new(slot, prev_hash, Vec::new())
    }

    pub fn hash(&self) -> BlockHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(BLOCK_HASH_DOMAIN);
        hasher.update(&self.slot.as_u64().to_be_bytes());
        hasher.update(self.prev_hash.as_bytes());
        for tx in &self.transactions {
            hasher.update(tx.id.as_bytes());
        }
        BlockHash(*hasher.finalize().as_bytes())
    }

    pub fn tx_ids(&self) -> impl Iterator<Item = TxId> + '_ {
        self.transactions.iter().map(|tx| tx.id)
    }
}
