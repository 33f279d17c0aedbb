use hdsync_types::SlotId;

use crate::account::Checkpoint;

/// Default rollback window, in blocks.
pub const DEFAULT_SECURITY_PARAMETER: usize = 2160;

/// Retention policy describing how much history the store keeps for rollbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of blocks that may ever be rolled back (`k`).
    pub security_parameter: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            security_parameter: DEFAULT_SECURITY_PARAMETER,
        }
    }
}

impl RetentionPolicy {
    pub fn new(security_parameter: usize) -> Self {
        Self { security_parameter }
    }

    /// Drop the oldest cursor entries so that at most `k` blocks stay rollbackable.
    ///
    /// `recent` is ordered oldest first; its first element is the base that can
    /// no longer be rolled past.
    pub fn prune_slots(&self, recent: &mut Vec<SlotId>) {
        let keep = self.security_parameter.saturating_add(1);
        if recent.len() > keep {
            let excess = recent.len() - keep;
            recent.drain(..excess);
        }
    }

    /// Determine whether a checkpoint is unreachable by any legal rollback.
    ///
    /// A checkpoint is still needed when it is the newest one at or below the
    /// base, or lies above the base.
    pub fn should_prune(&self, checkpoint_slot: SlotId, next_slot: Option<SlotId>, base: SlotId) -> bool {
        match next_slot {
            Some(next) => checkpoint_slot < base && next <= base,
            None => false,
        }
    }

    /// Remove checkpoints (ordered oldest first) that no rollback can reach.
    pub fn prune_checkpoints(&self, checkpoints: &mut Vec<Checkpoint>, base: SlotId) -> usize {
        let prunable = checkpoints
            .windows(2)
            .take_while(|pair| self.should_prune(pair[0].slot, Some(pair[1].slot), base))
            .count();
        checkpoints.drain(..prunable);
        prunable
    }
}
