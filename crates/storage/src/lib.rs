//! Checkpointing wallet store.
//!
//! The store owns the single slot cursor and the per-account checkpoint
//! history. It executes three kinds of atomic commands (apply a block,
//! switch to a fork, and, for tests only, roll back) and rejects rollbacks
//! it cannot honour without touching any state.

use hdsync_types::{HdAccountId, PrefilteredSlot, SlotId, WalletId};

pub mod account;
pub mod cursor;
pub mod memory;
pub mod retention;
pub mod sled_store;
pub mod state;

pub use account::{Checkpoint, HdAccount, WalletRecord};
pub use cursor::ChainCursor;
pub use memory::MemoryStore;
pub use retention::{RetentionPolicy, DEFAULT_SECURITY_PARAMETER};
pub use sled_store::SledStore;
pub use state::StoreState;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("cannot roll back {requested} blocks: only {available} can be rolled back")]
    RollbackDuringRestoration { requested: usize, available: usize },
    #[error("fork of {fork_len} blocks cannot replace {rollback} rolled back blocks")]
    ForkTooShort { rollback: usize, fork_len: usize },
    #[error("block at slot {slot} does not follow tip {tip}")]
    NotAscending { tip: SlotId, slot: SlotId },
    #[error("wallet {0} is not known to the store")]
    UnknownWallet(WalletId),
    #[error("wallet {0} already exists")]
    DuplicateWallet(WalletId),
    #[error("account {0} already exists")]
    DuplicateAccount(HdAccountId),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt key in {tree} tree: {reason}")]
    CorruptKey { tree: &'static str, reason: String },
    #[error("store transaction aborted")]
    TransactionAborted,
}

impl StoreError {
    /// Whether the store refused the command on semantic grounds (state untouched).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            StoreError::RollbackDuringRestoration { .. }
                | StoreError::ForkTooShort { .. }
                | StoreError::NotAscending { .. }
        )
    }
}

/// The contract the block applier relies on.
///
/// Implementations serialise command submission: `apply_block` and
/// `switch_to_fork` never interleave their effects, and each either fully
/// succeeds or leaves the store unchanged.
pub trait WalletStore: Send + Sync {
    /// Wallet roots currently registered. Read fresh on every call.
    fn wallet_ids(&self) -> Result<Vec<WalletId>, StoreError>;

    /// Slot of the most recently applied block.
    fn tip(&self) -> Result<SlotId, StoreError>;

    /// Deepest rollback the store would currently accept.
    fn max_rollback(&self) -> Result<usize, StoreError>;

    fn create_wallet(&self, id: WalletId, name: &str) -> Result<(), StoreError>;

    fn delete_wallet(&self, id: &WalletId) -> Result<(), StoreError>;

    /// Register an account; its history starts at the current tip.
    fn create_account(&self, id: HdAccountId, name: &str) -> Result<(), StoreError>;

    fn account(&self, id: &HdAccountId) -> Result<Option<HdAccount>, StoreError>;

    fn accounts_of(&self, wallet: &WalletId) -> Result<Vec<HdAccount>, StoreError>;

    /// Apply one prefiltered block and advance the cursor to its slot.
    fn apply_block(&self, block: PrefilteredSlot) -> Result<(), StoreError>;

    /// Roll back `rollback` blocks, then apply `blocks` oldest first, as one operation.
    fn switch_to_fork(&self, rollback: usize, blocks: Vec<PrefilteredSlot>) -> Result<(), StoreError>;
}

/// Rollback without a replacement fork.
///
/// Production code only ever rolls back as part of a fork switch; this
/// capability exists so tests can observe rollback in isolation.
#[cfg(any(test, feature = "test-utils"))]
pub trait RollbackForTests: WalletStore {
    /// Roll back the most recent block.
    fn rollback(&self) -> Result<(), StoreError>;
}
