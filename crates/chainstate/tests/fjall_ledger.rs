mod common;

use std::sync::Arc;

use common::ChainBuilder;
use flsd_chainstate::{CoinView, Ledger};
use flsd_consensus::{consensus_params, Network};
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::fjall::FjallStore;

fn open(path: &std::path::Path) -> (Arc<FjallStore>, Ledger<FjallStore>) {
    let store = Arc::new(FjallStore::open(path).expect("open store"));
    let ledger = Ledger::open(Arc::clone(&store), consensus_params(Network::Regtest));
    (store, ledger)
}

#[test]
fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocks = {
        let (store, ledger) = open(dir.path());
        let mut chain = ChainBuilder::new(&ledger);
        chain.mine_empty(4);
        store.persist().expect("persist");
        chain.blocks
    };

    let (_store, ledger) = open(dir.path());
    let funding = OutPoint::new(blocks[3].transactions[0].txid(), 0);
    {
        let state = ledger.read().expect("read");
        let tip = state.tip().expect("tip").expect("entry");
        assert_eq!(tip.height, 3);
        assert_eq!(tip.hash, blocks[3].hash());
        assert_eq!(state.coins().best_block().expect("best"), Some(tip.hash));
        assert_eq!(state.coins().coin(&funding).expect("coin").expect("coin").height, 3);
    }

    let mut chain = ChainBuilder::new(&ledger);
    chain.blocks = blocks;
    chain.disconnect_tip();
    {
        let state = ledger.read().expect("read");
        assert_eq!(state.tip().expect("tip").expect("entry").height, 2);
        assert_eq!(state.coins().coin(&funding).expect("coin"), None);
    }

    chain.mine_empty(1);
    let state = ledger.read().expect("read");
    assert_eq!(state.tip().expect("tip").expect("entry").height, 3);
    assert!(state.coins().coin(&funding).expect("coin").is_some());
}
