use hdsync_types::SlotId;
use serde::{Deserialize, Serialize};

use crate::retention::RetentionPolicy;
use crate::StoreError;

/// The store's single chain position plus the slots that can still be rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCursor {
    /// Applied slots, oldest first. Never empty; the first entry is the base.
    recent: Vec<SlotId>,
}

impl Default for ChainCursor {
    fn default() -> Self {
        Self {
            recent: vec![SlotId::GENESIS],
        }
    }
}

impl ChainCursor {
    pub fn tip(&self) -> SlotId {
        self.recent.last().copied().unwrap_or(SlotId::GENESIS)
    }

    /// Oldest slot the store can still return to.
    pub fn base(&self) -> SlotId {
        self.recent.first().copied().unwrap_or(SlotId::GENESIS)
    }

    /// Number of blocks the retained history allows to be rolled back.
    pub fn max_rollback(&self) -> usize {
        self.recent.len().saturating_sub(1)
    }

    /// Largest rollback whose target slot is not older than `birth`.
    pub fn max_rollback_above(&self, birth: SlotId) -> usize {
        let first_reachable = self.recent.partition_point(|slot| *slot < birth);
        self.recent.len().saturating_sub(first_reachable + 1)
    }

    /// Slot that becomes the tip after rolling back `n` blocks.
    pub fn target_of(&self, n: usize) -> Option<SlotId> {
        if n > self.max_rollback() {
            return None;
        }
        self.recent.get(self.recent.len() - 1 - n).copied()
    }

    pub(crate) fn advance(&mut self, slot: SlotId, policy: &RetentionPolicy) -> Result<(), StoreError> {
        let tip = self.tip();
        if slot <= tip {
            return Err(StoreError::NotAscending { tip, slot });
        }
        self.recent.push(slot);
        policy.prune_slots(&mut self.recent);
        Ok(())
    }

    pub(crate) fn rollback(&mut self, n: usize) -> Result<SlotId, StoreError> {
        let target = self
            .target_of(n)
            .ok_or(StoreError::RollbackDuringRestoration {
                requested: n,
                available: self.max_rollback(),
            })?;
        let keep = self.recent.len() - n;
        self.recent.truncate(keep);
        Ok(target)
    }
}
