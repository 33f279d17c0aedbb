use hdsync_storage::{MemoryStore, SledStore, StoreError, WalletStore};
use hdsync_types::{
    AccountMap, Address, Amount, BlockHash, HdAccountId, HdAccountIx, HdAddressIx,
    PrefilteredBlock, ResolvedBlock, ResolvedInput, ResolvedTx, SlotId, TxOut, WalletId,
};
use hdsync_wallet::*;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tempfile::tempdir;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn captured<T>(logs: &CapturedLogs, f: impl FnOnce() -> T) -> T {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

fn address(credential: &Credential, account: u32, index: u32) -> Address {
    derive_address(credential, HdAccountIx(account), HdAddressIx(index)).unwrap()
}

fn paying(slot: u64, outputs: Vec<(Address, u64)>) -> ResolvedBlock {
    let outputs = outputs
        .into_iter()
        .map(|(address, amount)| TxOut::new(address, Amount::from_atomic(amount)))
        .collect();
    ResolvedBlock::new(SlotId(slot), BlockHash::ZERO, vec![ResolvedTx::new(vec![], outputs)])
}

fn empty(slot: u64) -> ResolvedBlock {
    ResolvedBlock::empty(SlotId(slot), BlockHash::ZERO)
}

struct Fixture {
    store: Arc<MemoryStore>,
    keystore: Arc<MemoryKeystore>,
    applier: TestApplier,
    w1: Credential,
    w2: Credential,
}

/// Two registered wallets with one account each; only W1's key is available.
fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let keystore = Arc::new(MemoryKeystore::new());
    let w1 = Credential::from_seed([1u8; 32]);
    let w2 = Credential::from_seed([2u8; 32]);
    for (credential, name) in [(&w1, "w1"), (&w2, "w2")] {
        store.create_wallet(credential.wallet_id(), name).unwrap();
        store
            .create_account(HdAccountId::new(credential.wallet_id(), 0), name)
            .unwrap();
    }
    keystore.insert(&w1).unwrap();
    let applier = TestApplier::new(store.clone(), keystore.clone());
    Fixture {
        store,
        keystore,
        applier,
        w1,
        w2,
    }
}

fn balance(store: &dyn WalletStore, wallet: WalletId, ix: u32) -> u64 {
    store
        .account(&HdAccountId::new(wallet, ix))
        .unwrap()
        .map(|account| account.balance().atomic())
        .unwrap_or_default()
}

#[test]
fn test_block_with_missing_credential_scenario() {
    let fx = fixture();
    fx.applier.apply_block(&empty(10)).unwrap();
    assert_eq!(fx.store.tip().unwrap(), SlotId(10));
    let w2_before = fx
        .store
        .account(&HdAccountId::new(fx.w2.wallet_id(), 0))
        .unwrap();

    let logs = CapturedLogs::default();
    let block = paying(11, vec![(address(&fx.w1, 0, 0), 700)]);
    captured(&logs, || fx.applier.apply_block(&block)).unwrap();

    assert_eq!(fx.store.tip().unwrap(), SlotId(11));
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 0), 700);
    assert_eq!(
        fx.store
            .account(&HdAccountId::new(fx.w2.wallet_id(), 0))
            .unwrap(),
        w2_before
    );

    let output = logs.contents();
    let advisories: Vec<_> = output
        .lines()
        .filter(|line| line.contains("no credentials for wallets"))
        .collect();
    assert_eq!(advisories.len(), 1);
    assert!(advisories[0].contains("ERROR"));
    assert!(advisories[0].contains(&fx.w2.wallet_id().to_hex()));
    assert!(!advisories[0].contains(&fx.w1.wallet_id().to_hex()));
}

#[test]
fn test_missing_credential_picked_up_on_next_block() {
    let fx = fixture();
    fx.applier
        .apply_block(&paying(1, vec![(address(&fx.w2, 0, 0), 5)]))
        .unwrap();
    assert_eq!(balance(fx.store.as_ref(), fx.w2.wallet_id(), 0), 0);

    fx.keystore.insert(&fx.w2).unwrap();
    fx.applier
        .apply_block(&paying(2, vec![(address(&fx.w2, 0, 3), 6)]))
        .unwrap();
    assert_eq!(balance(fx.store.as_ref(), fx.w2.wallet_id(), 0), 6);
}

#[test]
fn test_apply_blocks_matches_individual_application() {
    let batched = fixture();
    let single = fixture();
    let blocks = vec![
        paying(1, vec![(address(&batched.w1, 0, 0), 10)]),
        empty(2),
        paying(5, vec![(address(&batched.w1, 1, 0), 20)]),
    ];

    assert_eq!(batched.applier.apply_blocks(&blocks).unwrap(), Some(SlotId(5)));
    for block in &blocks {
        single.applier.apply_block(block).unwrap();
    }
    assert_eq!(batched.store.snapshot(), single.store.snapshot());
    assert_eq!(batched.applier.apply_blocks(&[]).unwrap(), None);
}

#[test]
fn test_apply_blocks_reports_progress_on_failure() {
    let fx = fixture();
    let blocks = vec![empty(3), empty(4), empty(4), empty(6)];
    let err = fx.applier.apply_blocks(&blocks).unwrap_err();

    assert_eq!(err.applied_up_to, Some(SlotId(4)));
    assert!(matches!(
        err.cause,
        ApplyBlockError::Store(StoreError::NotAscending { .. })
    ));
    assert!(err.to_string().contains("applied up to slot 4"));
    assert_eq!(fx.store.tip().unwrap(), SlotId(4));

    let first = fx.applier.apply_blocks(&[empty(2)]).unwrap_err();
    assert_eq!(first.applied_up_to, None);
}

#[test]
fn test_slot_only_decreases_through_switch() {
    let fx = fixture();
    fx.applier
        .apply_blocks(&[
            paying(1, vec![(address(&fx.w1, 0, 0), 100)]),
            paying(2, vec![(address(&fx.w1, 0, 1), 200)]),
            paying(3, vec![(address(&fx.w1, 0, 2), 300)]),
        ])
        .unwrap();
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 0), 600);

    let fork = vec![
        paying(2, vec![(address(&fx.w1, 0, 5), 1)]),
        paying(4, vec![(address(&fx.w1, 2, 0), 2)]),
    ];
    fx.applier.switch_to_fork(2, &fork).unwrap();

    assert_eq!(fx.store.tip().unwrap(), SlotId(4));
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 0), 101);
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 2), 2);
}

#[test]
fn test_illegal_switch_leaves_state_untouched() {
    let fx = fixture();
    fx.applier
        .apply_blocks(&[
            paying(1, vec![(address(&fx.w1, 0, 0), 100)]),
            paying(2, vec![(address(&fx.w1, 0, 1), 200)]),
        ])
        .unwrap();
    let before = fx.store.snapshot();
    let account_bytes = |store: &MemoryStore| {
        serde_json::to_vec(&store.accounts_of(&fx.w1.wallet_id()).unwrap()).unwrap()
    };
    let bytes_before = account_bytes(fx.store.as_ref());

    let too_deep = fx
        .applier
        .switch_to_fork(3, &[empty(1), empty(2), empty(3)])
        .unwrap_err();
    assert!(matches!(
        too_deep,
        ApplyBlockError::Store(StoreError::RollbackDuringRestoration { .. })
    ));
    assert!(too_deep.is_rejection());

    let too_short = fx.applier.switch_to_fork(2, &[empty(5)]).unwrap_err();
    assert!(matches!(
        too_short,
        ApplyBlockError::Store(StoreError::ForkTooShort { .. })
    ));

    assert_eq!(fx.store.snapshot(), before);
    assert_eq!(account_bytes(fx.store.as_ref()), bytes_before);
}

#[test]
fn test_account_restored_late_limits_rollback() {
    let fx = fixture();
    fx.applier.apply_blocks(&[empty(1), empty(2)]).unwrap();
    fx.store
        .create_account(HdAccountId::new(fx.w1.wallet_id(), 7), "restored")
        .unwrap();
    fx.applier.apply_block(&empty(3)).unwrap();

    let err = fx
        .applier
        .switch_to_fork(2, &[empty(2), empty(3)])
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyBlockError::Store(StoreError::RollbackDuringRestoration {
            requested: 2,
            available: 1
        })
    ));
    fx.applier.switch_to_fork(1, &[empty(3)]).unwrap();
}

#[test]
fn test_switch_across_first_payment_to_new_account() {
    let fx = fixture();
    let quiet: Vec<_> = (1..=10).map(empty).collect();
    fx.applier.apply_blocks(&quiet).unwrap();
    fx.applier
        .apply_block(&paying(11, vec![(address(&fx.w1, 1, 0), 40)]))
        .unwrap();
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 1), 40);
    assert_eq!(fx.store.max_rollback().unwrap(), 11);

    fx.applier
        .switch_to_fork(
            2,
            &[
                empty(10),
                paying(11, vec![(address(&fx.w1, 1, 0), 15)]),
                empty(12),
            ],
        )
        .unwrap();
    assert_eq!(fx.store.tip().unwrap(), SlotId(12));
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 1), 15);
}

#[test]
fn test_observable_rollback() {
    let fx = fixture();
    fx.applier
        .apply_blocks(&[
            paying(1, vec![(address(&fx.w1, 0, 0), 9)]),
            paying(2, vec![(address(&fx.w1, 0, 1), 1)]),
        ])
        .unwrap();

    fx.applier.observable_rollback_use_in_tests_only().unwrap();
    assert_eq!(fx.store.tip().unwrap(), SlotId(1));
    assert_eq!(balance(fx.store.as_ref(), fx.w1.wallet_id(), 0), 9);
}

#[test]
fn test_spend_and_change_through_engine() {
    let fx = fixture();
    let funding = ResolvedTx::new(
        vec![],
        vec![TxOut::new(address(&fx.w1, 0, 0), Amount::from_atomic(50))],
    );
    let funded = funding.out_point(0);
    fx.applier
        .apply_block(&ResolvedBlock::new(SlotId(1), BlockHash::ZERO, vec![funding.clone()]))
        .unwrap();

    let spend = ResolvedTx::new(
        vec![ResolvedInput {
            tx_in: funded,
            spent: funding.outputs[0].clone(),
        }],
        vec![
            TxOut::new(address(&fx.w2, 0, 0), Amount::from_atomic(30)),
            TxOut::new(address(&fx.w1, 0, 1), Amount::from_atomic(20)),
        ],
    );
    fx.keystore.insert(&fx.w2).unwrap();
    fx.applier
        .apply_block(&ResolvedBlock::new(SlotId(2), BlockHash::ZERO, vec![spend.clone()]))
        .unwrap();

    let account = fx
        .store
        .account(&HdAccountId::new(fx.w1.wallet_id(), 0))
        .unwrap()
        .unwrap();
    assert_eq!(account.balance(), Amount::from_atomic(20));
    assert!(!account.utxo().contains_key(&funded));
    assert!(account.current().addresses[&address(&fx.w1, 0, 1)].change);
    assert_eq!(account.current().history.get(&spend.id), Some(&SlotId(2)));
    assert_eq!(balance(fx.store.as_ref(), fx.w2.wallet_id(), 0), 30);
}

/// Filter that claims every block for one fixed account, whatever the wallet.
struct GreedyFilter(HdAccountId);

impl BlockFilter for GreedyFilter {
    fn filter_block(&self, _: &ResolvedBlock, _: WalletId, _: &Credential) -> AccountMap {
        AccountMap::from([(self.0, PrefilteredBlock::default())])
    }
}

#[test]
fn test_duplicate_account_aborts_before_store() {
    let fx = fixture();
    fx.keystore.insert(&fx.w2).unwrap();
    let greedy = GreedyFilter(HdAccountId::new(fx.w1.wallet_id(), 0));
    let applier = BlockApplier::with_filter(fx.store.clone(), fx.keystore.clone(), Arc::new(greedy));

    let err = applier.apply_block(&empty(1)).unwrap_err();
    assert!(matches!(err, ApplyBlockError::DuplicateAccount { .. }));
    assert_eq!(fx.store.tip().unwrap(), SlotId::GENESIS);
}

#[test]
fn test_sled_store_with_file_keystore() {
    let dir = tempdir().unwrap();
    let keys = dir.path().join("keys");
    let credential = Credential::generate();
    let wallet = credential.wallet_id();

    {
        let store = Arc::new(SledStore::new(dir.path().join("db"), Default::default()).unwrap());
        let keystore = Arc::new(FileKeystore::open(&keys).unwrap());
        keystore.insert(&credential).unwrap();
        store.create_wallet(wallet, "disk").unwrap();
        store.create_account(HdAccountId::new(wallet, 0), "main").unwrap();

        let applier = BlockApplier::new(store.clone(), keystore);
        applier
            .apply_blocks(&[
                paying(1, vec![(address(&credential, 0, 0), 11)]),
                paying(2, vec![(address(&credential, 0, 1), 22)]),
            ])
            .unwrap();
        applier
            .switch_to_fork(1, &[paying(2, vec![(address(&credential, 0, 2), 33)])])
            .unwrap();
        store.flush().unwrap();
    }

    let store = SledStore::new(dir.path().join("db"), Default::default()).unwrap();
    assert_eq!(store.tip().unwrap(), SlotId(2));
    assert_eq!(balance(&store, wallet, 0), 44);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn filter_results_are_disjoint_across_wallets(
            seed_a in any::<[u8; 32]>(),
            seed_b in any::<[u8; 32]>(),
            paths in prop::collection::vec((0u32..4, 0u32..4, any::<bool>()), 1..8),
        ) {
            prop_assume!(seed_a != seed_b);
            let a = Credential::from_seed(seed_a);
            let b = Credential::from_seed(seed_b);
            let outputs = paths
                .iter()
                .map(|(account, index, to_a)| {
                    let owner = if *to_a { &a } else { &b };
                    (address(owner, *account, *index), 1)
                })
                .collect();
            let block = paying(1, outputs);

            let map_a = HdPayloadFilter.filter_block(&block, a.wallet_id(), &a);
            let map_b = HdPayloadFilter.filter_block(&block, b.wallet_id(), &b);
            prop_assert!(map_a.keys().all(|id| id.wallet == a.wallet_id()));
            prop_assert!(map_b.keys().all(|id| id.wallet == b.wallet_id()));
            prop_assert!(map_a.keys().all(|id| !map_b.contains_key(id)));

            let received: u64 = map_a.values().chain(map_b.values()).map(|p| p.received().atomic()).sum();
            prop_assert_eq!(received, paths.len() as u64);

            let creds = vec![(a.wallet_id(), a.clone()), (b.wallet_id(), b.clone())];
            let merged = prefilter_block(&block, &creds, &HdPayloadFilter).unwrap();
            prop_assert_eq!(merged.accounts.len(), map_a.len() + map_b.len());
        }

        #[test]
        fn credential_resolution_is_idempotent(present in prop::collection::vec(any::<bool>(), 0..6)) {
            let store = MemoryStore::new();
            let keystore = MemoryKeystore::new();
            for (ix, has_key) in present.iter().enumerate() {
                let credential = Credential::from_seed([ix as u8 + 1; 32]);
                store.create_wallet(credential.wallet_id(), "prop").unwrap();
                if *has_key {
                    keystore.insert(&credential).unwrap();
                }
            }

            let first = resolve_credentials(&store, &keystore).unwrap();
            let second = resolve_credentials(&store, &keystore).unwrap();
            prop_assert_eq!(first.resolved_ids().collect::<Vec<_>>(), second.resolved_ids().collect::<Vec<_>>());
            prop_assert_eq!(&first.missing, &second.missing);
            prop_assert_eq!(first.resolved.len(), present.iter().filter(|p| **p).count());
            prop_assert_eq!(first.missing.len() + first.resolved.len(), present.len());
        }
    }
}
