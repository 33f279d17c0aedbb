//! Chain application engine.
//!
//! Turns resolved blocks into atomic store commands. Every call starts by
//! resolving credentials afresh, so wallets added or removed between blocks
//! are picked up without restarting.

use hdsync_storage::WalletStore;
use hdsync_types::{PrefilteredSlot, ResolvedBlock, SlotId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::credentials::{resolve_credentials, ResolvedCredentials};
use crate::errors::{ApplyBlockError, ApplyBlocksError};
use crate::keystore::Keystore;
use crate::prefilter::{prefilter_block, BlockFilter, HdPayloadFilter};

pub struct BlockApplier {
    store: Arc<dyn WalletStore>,
    keystore: Arc<dyn Keystore>,
    filter: Arc<dyn BlockFilter>,
}

impl BlockApplier {
    /// Engine using the HD payload filter.
    pub fn new(store: Arc<dyn WalletStore>, keystore: Arc<dyn Keystore>) -> Self {
        Self::with_filter(store, keystore, Arc::new(HdPayloadFilter))
    }

    pub fn with_filter(
        store: Arc<dyn WalletStore>,
        keystore: Arc<dyn Keystore>,
        filter: Arc<dyn BlockFilter>,
    ) -> Self {
        Self {
            store,
            keystore,
            filter,
        }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.keystore
    }

    fn credentials(&self) -> Result<ResolvedCredentials, ApplyBlockError> {
        Ok(resolve_credentials(self.store.as_ref(), self.keystore.as_ref())?)
    }

    fn prefilter(
        &self,
        block: &ResolvedBlock,
        credentials: &ResolvedCredentials,
    ) -> Result<PrefilteredSlot, ApplyBlockError> {
        prefilter_block(block, &credentials.resolved, self.filter.as_ref())
    }

    /// Apply one block as a single store command.
    ///
    /// On success the store tip equals `block.slot`; on failure no account
    /// was touched.
    pub fn apply_block(&self, block: &ResolvedBlock) -> Result<(), ApplyBlockError> {
        let credentials = self.credentials()?;
        let prefiltered = self.prefilter(block, &credentials)?;
        debug!(
            slot = %block.slot,
            wallets = credentials.resolved.len(),
            accounts = prefiltered.accounts.len(),
            "prefiltered block"
        );
        self.store.apply_block(prefiltered)?;
        Ok(())
    }

    /// Apply blocks oldest first, one store command each.
    ///
    /// This is not one transaction: blocks before a failure stay applied and
    /// the error reports how far application got. Callers that want batched
    /// or pipelined application replace this loop; the per-block contract of
    /// [`apply_block`](Self::apply_block) stays the same.
    pub fn apply_blocks(&self, blocks: &[ResolvedBlock]) -> Result<Option<SlotId>, ApplyBlocksError> {
        let mut applied_up_to = None;
        for block in blocks {
            if let Err(cause) = self.apply_block(block) {
                return Err(ApplyBlocksError {
                    applied_up_to,
                    cause,
                });
            }
            applied_up_to = Some(block.slot);
        }
        Ok(applied_up_to)
    }

    /// Roll back `rollback` blocks and apply `fork` in their place, atomically.
    ///
    /// Every fork block is prefiltered with one credential snapshot before the
    /// store sees anything. A rejected switch leaves the store unchanged.
    pub fn switch_to_fork(
        &self,
        rollback: usize,
        fork: &[ResolvedBlock],
    ) -> Result<(), ApplyBlockError> {
        let credentials = self.credentials()?;
        let blocks = fork
            .iter()
            .map(|block| self.prefilter(block, &credentials))
            .collect::<Result<Vec<_>, _>>()?;
        let new_tip = blocks.last().map(|block| block.slot);
        self.store.switch_to_fork(rollback, blocks)?;
        info!(
            rollback,
            fork_len = fork.len(),
            tip = ?new_tip,
            "wallet state switched to fork"
        );
        Ok(())
    }
}
