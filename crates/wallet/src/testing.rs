//! Rollback without a replacement fork, for test suites only.
//!
//! Compiled with `cfg(test)` or the `test-utils` feature; production builds
//! can only roll back through [`BlockApplier::switch_to_fork`].

use hdsync_storage::{RollbackForTests, WalletStore};
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

use crate::applier::BlockApplier;
use crate::errors::ApplyBlockError;
use crate::keystore::Keystore;
use crate::prefilter::{BlockFilter, HdPayloadFilter};

/// A [`BlockApplier`] that can additionally undo the last block.
pub struct TestApplier {
    applier: BlockApplier,
    rollback: Arc<dyn RollbackForTests>,
}

impl TestApplier {
    pub fn new<S>(store: Arc<S>, keystore: Arc<dyn Keystore>) -> Self
    where
        S: WalletStore + RollbackForTests + 'static,
    {
        Self::with_filter(store, keystore, Arc::new(HdPayloadFilter))
    }

    pub fn with_filter<S>(store: Arc<S>, keystore: Arc<dyn Keystore>, filter: Arc<dyn BlockFilter>) -> Self
    where
        S: WalletStore + RollbackForTests + 'static,
    {
        let rollback: Arc<dyn RollbackForTests> = store.clone();
        Self {
            applier: BlockApplier::with_filter(store, keystore, filter),
            rollback,
        }
    }

    /// Roll back the most recent block with no fork to replace it.
    pub fn observable_rollback_use_in_tests_only(&self) -> Result<(), ApplyBlockError> {
        self.rollback.rollback()?;
        info!(tip = %self.rollback.tip()?, "rolled back one block");
        Ok(())
    }
}

impl Deref for TestApplier {
    type Target = BlockApplier;

    fn deref(&self) -> &Self::Target {
        &self.applier
    }
}
