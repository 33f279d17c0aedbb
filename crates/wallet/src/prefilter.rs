//! Projection of resolved blocks onto the accounts of the known wallets.

use hdsync_types::{
    AccountMap, AddressMeta, HdAccountId, PrefilteredBlock, PrefilteredSlot, ResolvedBlock,
    WalletId,
};
use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::{address_owner, Credential};
use crate::errors::ApplyBlockError;

/// Decides which parts of a block belong to which account of one wallet.
///
/// Implementations must be pure: the same block and credential always
/// produce the same map, and nothing is mutated.
pub trait BlockFilter: Send + Sync {
    fn filter_block(
        &self,
        block: &ResolvedBlock,
        wallet: WalletId,
        credential: &Credential,
    ) -> AccountMap;
}

/// Recognises addresses by decrypting their HD payload with the wallet root.
#[derive(Debug, Default, Clone, Copy)]
pub struct HdPayloadFilter;

impl BlockFilter for HdPayloadFilter {
    fn filter_block(
        &self,
        block: &ResolvedBlock,
        wallet: WalletId,
        credential: &Credential,
    ) -> AccountMap {
        let mut accounts = AccountMap::new();
        for tx in &block.transactions {
            let mut spenders = BTreeSet::new();
            for input in &tx.inputs {
                let Some(ix) = address_owner(credential, &input.spent.address) else {
                    continue;
                };
                let id = HdAccountId::new(wallet, ix.0);
                let entry = accounts.entry(id).or_insert_with(PrefilteredBlock::default);
                entry.inputs.insert(input.tx_in);
                entry.meta.record_tx(tx.id, block.slot);
                spenders.insert(id);
            }

            for (tx_in, out) in tx.indexed_outputs() {
                let Some(ix) = address_owner(credential, &out.address) else {
                    continue;
                };
                let id = HdAccountId::new(wallet, ix.0);
                let entry = accounts.entry(id).or_insert_with(PrefilteredBlock::default);
                entry.outputs.insert(tx_in, out.clone());
                entry.meta.record_tx(tx.id, block.slot);
                entry.meta.record_address(
                    out.address.clone(),
                    AddressMeta {
                        used: true,
                        change: spenders.contains(&id),
                    },
                );
            }
        }
        accounts
    }
}

/// Filter `block` for every resolved wallet and merge the per-wallet maps.
///
/// Account ids are unique across wallets; if two wallets produce the same
/// account the block is refused before anything reaches the store.
pub fn prefilter_block(
    block: &ResolvedBlock,
    credentials: &[(WalletId, Credential)],
    filter: &dyn BlockFilter,
) -> Result<PrefilteredSlot, ApplyBlockError> {
    let mut merged = AccountMap::new();
    let mut owners: BTreeMap<HdAccountId, WalletId> = BTreeMap::new();

    for (wallet, credential) in credentials {
        for (account, prefiltered) in filter.filter_block(block, *wallet, credential) {
            if let Some(first) = owners.insert(account, *wallet) {
                return Err(ApplyBlockError::DuplicateAccount {
                    account,
                    first,
                    second: *wallet,
                });
            }
            merged.insert(account, prefiltered);
        }
    }
    Ok(PrefilteredSlot::new(block.slot, merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_address;
    use hdsync_types::{
        Address, Amount, BlockHash, HdAccountIx, HdAddressIx, ResolvedInput, ResolvedTx, SlotId,
        TxId, TxIn, TxOut,
    };

    fn address(credential: &Credential, account: u32, index: u32) -> Address {
        derive_address(credential, HdAccountIx(account), HdAddressIx(index)).unwrap()
    }

    #[test]
    fn test_outputs_are_routed_to_owning_account() {
        let alice = Credential::from_seed([1u8; 32]);
        let bob = Credential::from_seed([2u8; 32]);
        let tx = ResolvedTx::new(
            vec![],
            vec![
                TxOut::new(address(&alice, 0, 0), Amount::from_atomic(10)),
                TxOut::new(address(&alice, 2, 5), Amount::from_atomic(20)),
                TxOut::new(address(&bob, 0, 0), Amount::from_atomic(30)),
            ],
        );
        let block = ResolvedBlock::new(SlotId(3), BlockHash::ZERO, vec![tx.clone()]);

        let map = HdPayloadFilter.filter_block(&block, alice.wallet_id(), &alice);
        assert_eq!(map.len(), 2);
        let second = &map[&HdAccountId::new(alice.wallet_id(), 2)];
        assert_eq!(second.received(), Amount::from_atomic(20));
        assert_eq!(second.meta.tx_slots.get(&tx.id), Some(&SlotId(3)));
        assert!(second.outputs.contains_key(&tx.out_point(1)));
    }

    #[test]
    fn test_change_output_is_flagged() {
        let alice = Credential::from_seed([1u8; 32]);
        let funding = TxIn::new(TxId([7u8; 32]), 0);
        let change = address(&alice, 0, 1);
        let tx = ResolvedTx::new(
            vec![ResolvedInput {
                tx_in: funding,
                spent: TxOut::new(address(&alice, 0, 0), Amount::from_atomic(50)),
            }],
            vec![
                TxOut::new(Address::plain([9u8; 32]), Amount::from_atomic(35)),
                TxOut::new(change.clone(), Amount::from_atomic(15)),
            ],
        );
        let block = ResolvedBlock::new(SlotId(8), BlockHash::ZERO, vec![tx]);

        let map = HdPayloadFilter.filter_block(&block, alice.wallet_id(), &alice);
        let account = &map[&HdAccountId::new(alice.wallet_id(), 0)];
        assert!(account.inputs.contains(&funding));
        assert_eq!(account.meta.addresses[&change], AddressMeta { used: true, change: true });
    }

    #[test]
    fn test_prefilter_merges_wallets() {
        let alice = Credential::from_seed([1u8; 32]);
        let bob = Credential::from_seed([2u8; 32]);
        let tx = ResolvedTx::new(
            vec![],
            vec![
                TxOut::new(address(&alice, 0, 0), Amount::from_atomic(1)),
                TxOut::new(address(&bob, 0, 0), Amount::from_atomic(2)),
            ],
        );
        let block = ResolvedBlock::new(SlotId(1), BlockHash::ZERO, vec![tx]);
        let creds = vec![(alice.wallet_id(), alice.clone()), (bob.wallet_id(), bob.clone())];

        let slot = prefilter_block(&block, &creds, &HdPayloadFilter).unwrap();
        assert_eq!(slot.slot, SlotId(1));
        assert_eq!(slot.accounts.len(), 2);
    }

    #[test]
    fn test_duplicate_account_aborts() {
        let alice = Credential::from_seed([1u8; 32]);
        let tx = ResolvedTx::new(
            vec![],
            vec![TxOut::new(address(&alice, 0, 0), Amount::from_atomic(1))],
        );
        let block = ResolvedBlock::new(SlotId(1), BlockHash::ZERO, vec![tx]);
        let creds = vec![(alice.wallet_id(), alice.clone()), (alice.wallet_id(), alice.clone())];

        let err = prefilter_block(&block, &creds, &HdPayloadFilter).unwrap_err();
        assert!(matches!(err, ApplyBlockError::DuplicateAccount { .. }));
    }
}
