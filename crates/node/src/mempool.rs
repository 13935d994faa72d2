use std::collections::HashMap;

use flsd_chainstate::PendingPool;
use flsd_consensus::Hash256;
use flsd_log::{log_debug, Category};
use flsd_primitives::block::Block;
use flsd_primitives::hex::hash256_to_hex;
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::{Transaction, TxOut};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    ConflictingInput,
    InvalidTransaction,
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

/// Transactions waiting for a block, plus the outpoints they spend.
#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, Transaction>,
    spent: HashMap<OutPoint, Hash256>,
    revision: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn txids(&self) -> Vec<Hash256> {
        let mut out: Vec<_> = self.entries.keys().copied().collect();
        out.sort();
        out
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.get(txid)
    }

    /// Adds `tx` unless it is already pooled or spends an outpoint another
    /// pooled transaction spends.
    pub fn insert(&mut self, tx: Transaction) -> Result<Hash256, MempoolError> {
        if tx.is_coinbase() || tx.is_coinstake() {
            return Err(MempoolError::new(
                MempoolErrorKind::InvalidTransaction,
                "coinbase and coinstake transactions cannot be pooled",
            ));
        }
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "transaction already in mempool",
            ));
        }
        for input in tx.vin.iter().filter(|input| !input.is_zerocoin_spend()) {
            if let Some(conflict) = self.spent.get(&input.prevout) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "input {} already spent by {}",
                        input.prevout,
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }
        for input in tx.vin.iter().filter(|input| !input.is_zerocoin_spend()) {
            self.spent.insert(input.prevout.clone(), txid);
        }
        self.entries.insert(txid, tx);
        self.revision = self.revision.saturating_add(1);
        log_debug!(cat: Category::Mempool, "accepted {}", hash256_to_hex(&txid));
        Ok(txid)
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<Transaction> {
        let tx = self.entries.remove(txid)?;
        for input in &tx.vin {
            if self.spent.get(&input.prevout) == Some(txid) {
                self.spent.remove(&input.prevout);
            }
        }
        self.revision = self.revision.saturating_add(1);
        Some(tx)
    }

    /// Drops every pooled transaction `block` confirms or conflicts with.
    /// Returns how many were removed.
    pub fn remove_for_block(&mut self, block: &Block) -> usize {
        let mut doomed = Vec::new();
        for tx in &block.transactions {
            let txid = tx.txid();
            if self.entries.contains_key(&txid) {
                doomed.push(txid);
            }
            for input in &tx.vin {
                if let Some(spender) = self.spent.get(&input.prevout) {
                    if *spender != txid {
                        doomed.push(*spender);
                    }
                }
            }
        }
        let removed = doomed
            .iter()
            .filter(|txid| self.remove(txid).is_some())
            .count();
        if removed > 0 {
            log_debug!(
                cat: Category::Mempool,
                "removed {removed} transactions for block {}",
                hash256_to_hex(&block.hash())
            );
        }
        removed
    }
}

impl PendingPool for Mempool {
    fn pending_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        let tx = self.entries.get(&outpoint.hash)?;
        let index = usize::try_from(outpoint.index).ok()?;
        tx.vout.get(index).cloned()
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains_key(outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flsd_primitives::block::BlockHeader;
    use flsd_primitives::transaction::TxIn;

    fn spend(prevout: OutPoint, value: i64) -> Transaction {
        Transaction::new(vec![TxIn::new(prevout)], vec![TxOut::new(value, vec![0x51])])
    }

    #[test]
    fn conflicting_spend_is_rejected() {
        let mut pool = Mempool::new();
        let funding = OutPoint::new([1u8; 32], 0);
        let first = pool.insert(spend(funding.clone(), 10)).expect("insert");

        let err = pool.insert(spend(funding.clone(), 9)).expect_err("conflict");
        assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
        let err = pool.insert(spend(funding.clone(), 10)).expect_err("duplicate");
        assert_eq!(err.kind, MempoolErrorKind::AlreadyInMempool);

        assert!(pool.is_spent(&funding));
        assert_eq!(pool.spender(&funding), Some(first));
        assert_eq!(
            pool.pending_output(&OutPoint::new(first, 0)).map(|out| out.value),
            Some(10)
        );
        assert_eq!(pool.pending_output(&OutPoint::new(first, 1)), None);

        pool.remove(&first).expect("remove");
        assert!(!pool.is_spent(&funding));
        pool.insert(spend(funding, 9)).expect("insert after remove");
    }

    #[test]
    fn coinbase_is_rejected() {
        let mut pool = Mempool::new();
        let coinbase = Transaction::new(vec![TxIn::new(OutPoint::null())], vec![TxOut::new(1, vec![0x51])]);
        let err = pool.insert(coinbase).expect_err("coinbase");
        assert_eq!(err.kind, MempoolErrorKind::InvalidTransaction);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn block_removes_confirmed_and_conflicting() {
        let mut pool = Mempool::new();
        let a = OutPoint::new([1u8; 32], 0);
        let b = OutPoint::new([2u8; 32], 0);
        let confirmed = spend(a.clone(), 10);
        pool.insert(confirmed.clone()).expect("insert");
        let loser = pool.insert(spend(b.clone(), 5)).expect("insert");
        let survivor = pool.insert(spend(OutPoint::new([3u8; 32], 0), 1)).expect("insert");

        let block = Block {
            header: BlockHeader {
                version: 4,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 0,
                bits: 0,
                nonce: 0,
                accumulator_checkpoint: [0u8; 32],
            },
            transactions: vec![confirmed, spend(b, 4)],
            block_sig: Vec::new(),
        };
        assert_eq!(pool.remove_for_block(&block), 2);
        assert!(!pool.contains(&loser));
        assert_eq!(pool.txids(), vec![survivor]);
    }
}
