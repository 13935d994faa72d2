#![allow(dead_code)]

use std::sync::Arc;

use flsd_chainstate::{Ledger, LedgerError};
use flsd_consensus::money::COIN;
use flsd_consensus::{consensus_params, Hash256, Network};
use flsd_primitives::block::{Block, BlockHeader};
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::{Transaction, TxIn, TxOut};
use flsd_script::standard::p2pkh_script;
use flsd_storage::memory::MemoryStore;
use flsd_storage::KeyValueStore;

pub const GENESIS_TIME: u32 = 1_600_000_000;

pub fn regtest_ledger() -> (Arc<MemoryStore>, Ledger<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::open(Arc::clone(&store), consensus_params(Network::Regtest));
    (store, ledger)
}

pub fn p2pkh(tag: u8) -> Vec<u8> {
    p2pkh_script(&[tag; 20])
}

/// Coinbase whose script commits to `height`, so every coinbase has its own txid.
pub fn coinbase(height: i32, vout: Vec<TxOut>) -> Transaction {
    let mut txin = TxIn::new(OutPoint::null());
    txin.script_sig = vec![4];
    txin.script_sig.extend_from_slice(&height.to_le_bytes());
    Transaction::new(vec![txin], vout)
}

pub fn spend(prevouts: &[OutPoint], vout: Vec<TxOut>) -> Transaction {
    Transaction::new(prevouts.iter().cloned().map(TxIn::new).collect(), vout)
}

/// Builds blocks on top of whatever the ledger's tip is.
pub struct ChainBuilder<'a, S> {
    pub ledger: &'a Ledger<S>,
    pub blocks: Vec<Block>,
    pub checkpoint: Hash256,
}

impl<'a, S: KeyValueStore> ChainBuilder<'a, S> {
    pub fn new(ledger: &'a Ledger<S>) -> Self {
        Self {
            ledger,
            blocks: Vec::new(),
            checkpoint: [0u8; 32],
        }
    }

    pub fn next_height(&self) -> i32 {
        self.ledger
            .read()
            .expect("read")
            .tip()
            .expect("tip")
            .map_or(0, |tip| tip.height + 1)
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.ledger
            .read()
            .expect("read")
            .tip()
            .expect("tip")
            .map_or([0u8; 32], |tip| tip.hash)
    }

    pub fn default_coinbase(&self) -> Transaction {
        coinbase(self.next_height(), vec![TxOut::new(50 * COIN, p2pkh(0xcb))])
    }

    /// Next block with `transactions` as its full body.
    pub fn block(&self, transactions: Vec<Transaction>) -> Block {
        let height = self.next_height();
        Block {
            header: BlockHeader {
                version: 4,
                prev_block: self.tip_hash(),
                merkle_root: [0u8; 32],
                time: GENESIS_TIME + height as u32 * 60,
                bits: 0x207f_ffff,
                nonce: height as u32,
                accumulator_checkpoint: self.checkpoint,
            },
            transactions,
            block_sig: Vec::new(),
        }
    }

    pub fn try_connect(&mut self, block: Block) -> Result<(), LedgerError> {
        self.ledger.write().expect("write").connect_block(&block)?;
        self.blocks.push(block);
        Ok(())
    }

    pub fn connect(&mut self, block: Block) -> Block {
        self.try_connect(block.clone()).expect("connect block");
        block
    }

    /// Mines a block with the default coinbase followed by `extra`.
    pub fn mine(&mut self, extra: Vec<Transaction>) -> Block {
        let mut transactions = vec![self.default_coinbase()];
        transactions.extend(extra);
        let block = self.block(transactions);
        self.connect(block)
    }

    pub fn mine_empty(&mut self, count: usize) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    pub fn disconnect_tip(&mut self) {
        let block = self.blocks.pop().expect("block to disconnect");
        self.ledger
            .write()
            .expect("write")
            .disconnect_tip(&block)
            .expect("disconnect")
            .expect("tip");
    }
}
