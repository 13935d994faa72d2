mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{coinbase, p2pkh, spend, ChainBuilder};
use flsd_chainstate::{Coin, CoinView, CoinsDb, CoinsViewCache, Fingerprint, Ledger, LedgerError};
use flsd_consensus::money::COIN;
use flsd_consensus::{consensus_params, Network};
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::TxOut;
use flsd_storage::memory::MemoryStore;
use flsd_storage::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch};

const KEYS: u8 = 24;

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn key(n: u8) -> OutPoint {
    OutPoint::new([n; 32], u32::from(n))
}

fn coin(value: i64) -> Coin {
    Coin::new(TxOut::new(value, p2pkh(1)), 1, false, false)
}

fn value_of<V: CoinView>(view: &V, n: u8) -> Option<i64> {
    view.coin(&key(n)).expect("coin").map(|coin| coin.out.value)
}

#[test]
fn nested_caches_match_a_flat_model() {
    let store = Arc::new(MemoryStore::new());
    let mut mid = CoinsViewCache::new(CoinsDb::new(Arc::clone(&store)));
    let mut model: BTreeMap<u8, i64> = BTreeMap::new();
    let mut flushed_model = model.clone();
    let mut rng = Lcg(0x5eed);

    for round in 0..200 {
        let snapshot = model.clone();
        {
            let mut child = CoinsViewCache::new(&mut mid);
            for _ in 0..20 {
                let n = rng.below(u64::from(KEYS)) as u8;
                if rng.below(2) == 0 {
                    let value = 1 + rng.below(1_000) as i64;
                    let possible_overwrite = model.contains_key(&n) || rng.below(2) == 0;
                    child
                        .add_coin(key(n), coin(value), possible_overwrite)
                        .expect("add");
                    model.insert(n, value);
                } else {
                    let spent = child.spend_coin(&key(n)).expect("spend");
                    assert_eq!(spent.map(|coin| coin.out.value), model.remove(&n));
                }
            }
            for n in 0..KEYS {
                assert_eq!(value_of(&child, n), model.get(&n).copied(), "round {round}");
            }
            if rng.below(4) == 0 {
                model = snapshot;
            } else {
                child.flush().expect("flush child");
            }
        }

        for n in 0..KEYS {
            assert_eq!(value_of(&mid, n), model.get(&n).copied(), "round {round}");
            assert_eq!(value_of(mid.parent(), n), flushed_model.get(&n).copied());
        }

        if rng.below(3) == 0 {
            mid.flush().expect("flush mid");
            flushed_model = model.clone();
            assert_eq!(mid.cache_size(), 0);
            assert_eq!(store.len(Column::Coins).expect("len"), model.len());
        }
    }
}

/// Memory store whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn fail(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.inner.scan_prefix(column, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.inner.write_batch(batch)
    }
}

#[test]
fn failed_flush_keeps_the_cache() {
    let store = Arc::new(FlakyStore::default());
    let mut cache = CoinsViewCache::new(CoinsDb::new(Arc::clone(&store)));
    for n in 0..4 {
        cache.add_coin(key(n), coin(100 + i64::from(n)), false).expect("add");
    }
    cache.set_best_block([9u8; 32]);

    store.fail(true);
    assert!(cache.flush().is_err());
    assert_eq!(cache.dirty_count(), 4);
    assert_eq!(value_of(&cache, 2), Some(102));
    assert_eq!(cache.best_block().expect("best"), Some([9u8; 32]));
    assert_eq!(value_of(cache.parent(), 2), None);

    store.fail(false);
    cache.flush().expect("flush");
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(value_of(cache.parent(), 2), Some(102));
    assert_eq!(cache.parent().best_block().expect("best"), Some([9u8; 32]));
}

#[test]
fn failed_commit_leaves_the_ledger_unchanged() {
    let store = Arc::new(FlakyStore::default());
    let ledger = Ledger::open(Arc::clone(&store), consensus_params(Network::Regtest));
    let mut chain = ChainBuilder::new(&ledger);
    chain.mine_empty(11);
    let kernel = OutPoint::new(chain.blocks[1].transactions[0].txid(), 0);
    let fingerprint = Fingerprint::transparent(&kernel);

    let staked = chain.block(vec![
        coinbase(11, vec![TxOut::empty()]),
        spend(
            std::slice::from_ref(&kernel),
            vec![TxOut::empty(), TxOut::new(51 * COIN, p2pkh(0xcb))],
        ),
    ]);

    store.fail(true);
    let err = chain.try_connect(staked.clone()).expect_err("commit fails");
    assert!(matches!(err, LedgerError::Store(StoreError::Backend(_))));
    {
        let state = ledger.read().expect("read");
        assert_eq!(state.tip().expect("tip").expect("entry").height, 10);
        assert!(state.coins().coin(&kernel).expect("coin").is_some());
        assert_eq!(state.coins().dirty_count(), 0);
        assert!(!state.uniqueness().contains(&fingerprint).expect("contains"));
        assert!(!state.uniqueness().has_pending());
        let reward = OutPoint::new(staked.transactions[1].txid(), 1);
        assert_eq!(state.coins().coin(&reward).expect("coin"), None);
    }

    store.fail(false);
    chain.connect(staked);
    let state = ledger.read().expect("read");
    assert_eq!(state.tip().expect("tip").expect("entry").height, 11);
    assert_eq!(state.uniqueness().height_of(&fingerprint).expect("height"), Some(11));
}
