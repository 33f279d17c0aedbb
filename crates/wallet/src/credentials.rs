use hdsync_storage::{StoreError, WalletStore};
use hdsync_types::WalletId;
use tracing::error;

use crate::crypto::Credential;
use crate::keystore::Keystore;

/// Outcome of looking up every registered wallet in the keystore.
#[derive(Debug, Default, Clone)]
pub struct ResolvedCredentials {
    pub resolved: Vec<(WalletId, Credential)>,
    /// Wallets registered in the store whose credential is not available.
    pub missing: Vec<WalletId>,
}

impl ResolvedCredentials {
    pub fn resolved_ids(&self) -> impl Iterator<Item = WalletId> + '_ {
        self.resolved.iter().map(|(id, _)| *id)
    }
}

/// Resolve every wallet the store knows about against the keystore.
///
/// The wallet set is read from the store on each call. Wallets without a
/// credential are reported in `missing` and logged once as a batch; they
/// are simply skipped for this block and picked up again on the next one.
pub fn resolve_credentials(
    store: &dyn WalletStore,
    keystore: &dyn Keystore,
) -> Result<ResolvedCredentials, StoreError> {
    let mut out = ResolvedCredentials::default();
    for wallet in store.wallet_ids()? {
        match keystore.lookup(&wallet) {
            Some(credential) => out.resolved.push((wallet, credential)),
            None => out.missing.push(wallet),
        }
    }

    if !out.missing.is_empty() {
        let missing = out
            .missing
            .iter()
            .map(WalletId::to_hex)
            .collect::<Vec<_>>()
            .join(", ");
        error!(
            count = out.missing.len(),
            wallets = %missing,
            "no credentials for wallets, skipping them for this block"
        );
    }
    Ok(out)
}
