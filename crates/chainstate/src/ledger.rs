//! Authoritative ledger state behind a single-writer lock.
//!
//! Readers take a shared guard and see only committed state. The writer
//! applies a block in a throwaway cache over the authoritative one and then
//! commits coins, undo data, stake fingerprints and the chain index in one
//! write batch.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flsd_consensus::{ConsensusParams, Hash256};
use flsd_log::{log_debug, log_info, log_warn, Category};
use flsd_primitives::block::Block;
use flsd_primitives::hex::hash256_to_hex;
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::{Transaction, TxIn, TxOut};
use flsd_script::standard::{classify_script_pubkey, ScriptType};
use flsd_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::coins::{is_unspendable, Coin};
use crate::db::CoinsDb;
use crate::index::{BlockIndexEntry, ChainIndex};
use crate::stake::{validate_stake, StakeError, StakeInput, ValidatedStake};
use crate::undo::{delete_block_undo, get_block_undo, put_block_undo, BlockUndo, SpentCoin};
use crate::uniqueness::{UniquenessError, UniquenessIndex};
use crate::view::{CoinsError, CoinsViewCache};

#[derive(Debug)]
pub enum LedgerError {
    Store(StoreError),
    Coins(CoinsError),
    Stake(StakeError),
    Uniqueness(UniquenessError),
    Poisoned,
    InvalidBlock(&'static str),
    MissingInput(OutPoint),
    StakeNotFound(OutPoint),
    MissingUndo(Hash256),
    TooManyOutpoints { max: usize, tried: usize },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Store(err) => write!(f, "{err}"),
            LedgerError::Coins(err) => write!(f, "{err}"),
            LedgerError::Stake(err) => write!(f, "{err}"),
            LedgerError::Uniqueness(err) => write!(f, "{err}"),
            LedgerError::Poisoned => write!(f, "ledger lock poisoned"),
            LedgerError::InvalidBlock(message) => write!(f, "{message}"),
            LedgerError::MissingInput(outpoint) => write!(f, "missing input {outpoint}"),
            LedgerError::StakeNotFound(outpoint) => {
                write!(f, "stake input {outpoint} is not an unspent coin")
            }
            LedgerError::MissingUndo(hash) => {
                write!(f, "missing undo data for block {}", hash256_to_hex(hash))
            }
            LedgerError::TooManyOutpoints { max, tried } => {
                write!(f, "max outpoints exceeded (max: {max}, tried: {tried})")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}

impl From<CoinsError> for LedgerError {
    fn from(err: CoinsError) -> Self {
        LedgerError::Coins(err)
    }
}

impl From<StakeError> for LedgerError {
    fn from(err: StakeError) -> Self {
        LedgerError::Stake(err)
    }
}

impl From<UniquenessError> for LedgerError {
    fn from(err: UniquenessError) -> Self {
        LedgerError::Uniqueness(err)
    }
}

pub struct Ledger<S> {
    state: RwLock<LedgerState<S>>,
}

impl<S: KeyValueStore> Ledger<S> {
    pub fn open(store: Arc<S>, params: ConsensusParams) -> Self {
        Self {
            state: RwLock::new(LedgerState::new(store, params)),
        }
    }

    /// Shared snapshot for read-only queries.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState<S>>, LedgerError> {
        self.state.read().map_err(|_| LedgerError::Poisoned)
    }

    /// Exclusive handle for block connection and flushing.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState<S>>, LedgerError> {
        self.state.write().map_err(|_| LedgerError::Poisoned)
    }
}

pub struct LedgerState<S> {
    params: ConsensusParams,
    store: Arc<S>,
    coins: CoinsViewCache<CoinsDb<S>>,
    chain: ChainIndex<S>,
    uniqueness: UniquenessIndex<S>,
}

impl<S: KeyValueStore> LedgerState<S> {
    fn new(store: Arc<S>, params: ConsensusParams) -> Self {
        Self {
            coins: CoinsViewCache::new(CoinsDb::new(Arc::clone(&store))),
            chain: ChainIndex::new(Arc::clone(&store)),
            uniqueness: UniquenessIndex::new(Arc::clone(&store)),
            params,
            store,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn coins(&self) -> &CoinsViewCache<CoinsDb<S>> {
        &self.coins
    }

    pub fn chain(&self) -> &ChainIndex<S> {
        &self.chain
    }

    pub fn uniqueness(&self) -> &UniquenessIndex<S> {
        &self.uniqueness
    }

    pub fn tip(&self) -> Result<Option<BlockIndexEntry>, LedgerError> {
        Ok(self.chain.tip()?)
    }

    /// Resolves and validates the stake carried by `txin` for a block at
    /// `height`/`time`, against the current committed state. A stake whose
    /// fingerprint is already recorded fails with `DoubleStake`.
    pub fn check_stake(
        &self,
        txin: &TxIn,
        height: i32,
        time: u32,
    ) -> Result<ValidatedStake, LedgerError> {
        let input = StakeInput::from_tx_in(txin, &self.coins)?
            .ok_or_else(|| LedgerError::StakeNotFound(txin.prevout.clone()))?;
        let stake = validate_stake(&input, height, time, &self.chain, &self.params)?;
        if let Some(recorded_at) = self.uniqueness.height_of(&stake.fingerprint)? {
            return Err(UniquenessError::DoubleStake {
                fingerprint: stake.fingerprint,
                recorded_at,
            }
            .into());
        }
        Ok(stake)
    }

    /// Connects `block` on top of the current tip. Nothing is written unless
    /// every check passes.
    pub fn connect_block(&mut self, block: &Block) -> Result<BlockIndexEntry, LedgerError> {
        let height = match self.chain.tip()? {
            Some(tip) if tip.hash == block.header.prev_block => tip.height + 1,
            Some(_) => return Err(LedgerError::InvalidBlock("block does not extend the tip")),
            None if block.header.prev_block == [0u8; 32] => 0,
            None => return Err(LedgerError::InvalidBlock("missing tip for non-genesis block")),
        };
        let entry = BlockIndexEntry::from_header(&block.header, height);
        match self.apply_block(block, &entry) {
            Ok(()) => {
                log_debug!(
                    "connected block {} at height {height}",
                    hash256_to_hex(&entry.hash)
                );
                Ok(entry)
            }
            Err(err) => {
                self.coins.discard_changes();
                self.uniqueness.discard();
                Err(err)
            }
        }
    }

    fn apply_block(&mut self, block: &Block, entry: &BlockIndexEntry) -> Result<(), LedgerError> {
        let height = u32::try_from(entry.height)
            .map_err(|_| LedgerError::InvalidBlock("negative block height"))?;
        if !matches!(block.transactions.first(), Some(tx) if tx.is_coinbase()) {
            return Err(LedgerError::InvalidBlock("first transaction is not a coinbase"));
        }
        check_stake_slots(block)?;

        let mut undo = BlockUndo::default();
        if let Some(coinstake) = block.coinstake() {
            let stake = self.check_stake(&coinstake.vin[0], entry.height, entry.time);
            let stake = match stake.and_then(|stake| {
                self.uniqueness.insert(stake.fingerprint, height)?;
                Ok(stake)
            }) {
                Ok(stake) => stake,
                Err(err @ LedgerError::Uniqueness(_)) => {
                    log_warn!(
                        cat: Category::Staking,
                        "rejecting block {}: {err}",
                        hash256_to_hex(&entry.hash)
                    );
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            log_debug!(
                cat: Category::Staking,
                "block {} stakes {} from height {}",
                hash256_to_hex(&entry.hash),
                stake.value,
                stake.origin.height
            );
            undo.stake_fingerprint = Some(stake.fingerprint);
        }

        {
            let mut view = CoinsViewCache::new(&mut self.coins);
            for tx in &block.transactions {
                if !tx.is_coinbase() {
                    for txin in tracked_inputs(tx) {
                        let coin = view
                            .spend_coin(&txin.prevout)?
                            .ok_or_else(|| LedgerError::MissingInput(txin.prevout.clone()))?;
                        undo.spent.push(SpentCoin {
                            outpoint: txin.prevout.clone(),
                            coin,
                        });
                    }
                }
                let txid = tx.txid();
                let is_coinbase = tx.is_coinbase();
                let is_coinstake = tx.is_coinstake();
                for (index, out) in tracked_outputs(tx) {
                    let coin = Coin::new(out.clone(), height, is_coinbase, is_coinstake);
                    view.add_coin(OutPoint::new(txid, index), coin, is_coinbase)?;
                }
            }
            view.set_best_block(entry.hash);
            view.flush()?;
        }

        let mut batch = WriteBatch::new();
        let changes = self.coins.pending_changes();
        self.coins.parent().stage_changes(&mut batch, &changes);
        put_block_undo(&mut batch, &entry.hash, &undo);
        self.uniqueness.stage(&mut batch);
        self.chain.put_entry(&mut batch, entry);
        self.chain.set_height_hash(&mut batch, entry.height, &entry.hash);
        self.chain.set_tip(&mut batch, &entry.hash);
        self.commit(&batch)?;
        self.coins.mark_flushed();
        Ok(())
    }

    /// Disconnects the tip, which must be `block`. Returns the removed entry,
    /// or `None` when the chain is empty.
    pub fn disconnect_tip(&mut self, block: &Block) -> Result<Option<BlockIndexEntry>, LedgerError> {
        let Some(tip) = self.chain.tip()? else {
            return Ok(None);
        };
        if block.hash() != tip.hash {
            return Err(LedgerError::InvalidBlock("block does not match the tip"));
        }
        match self.revert_block(block, &tip) {
            Ok(()) => {
                log_info!(
                    "disconnected block {} at height {}",
                    hash256_to_hex(&tip.hash),
                    tip.height
                );
                Ok(Some(tip))
            }
            Err(err) => {
                self.coins.discard_changes();
                self.uniqueness.discard();
                Err(err)
            }
        }
    }

    fn revert_block(&mut self, block: &Block, tip: &BlockIndexEntry) -> Result<(), LedgerError> {
        let undo = get_block_undo(self.store.as_ref(), &tip.hash)?
            .ok_or(LedgerError::MissingUndo(tip.hash))?;
        let mut spent = undo.spent;

        {
            let mut view = CoinsViewCache::new(&mut self.coins);
            for tx in block.transactions.iter().rev() {
                let txid = tx.txid();
                for (index, _) in tracked_outputs(tx) {
                    let outpoint = OutPoint::new(txid, index);
                    if view.spend_coin(&outpoint)?.is_none() {
                        log_warn!(
                            cat: Category::CoinDb,
                            "output {outpoint} missing while disconnecting block {}",
                            hash256_to_hex(&tip.hash)
                        );
                    }
                }
                if tx.is_coinbase() {
                    continue;
                }
                let count = tracked_inputs(tx).count();
                if count > spent.len() {
                    return Err(LedgerError::InvalidBlock("undo data does not match block"));
                }
                let start = spent.len() - count;
                for restored in spent.drain(start..).rev() {
                    view.add_coin(restored.outpoint, restored.coin, true)?;
                }
            }
            if !spent.is_empty() {
                return Err(LedgerError::InvalidBlock("undo data does not match block"));
            }
            view.set_best_block(tip.prev_hash);
            view.flush()?;
        }

        if let Some(fingerprint) = &undo.stake_fingerprint {
            let height = u32::try_from(tip.height)
                .map_err(|_| LedgerError::InvalidBlock("negative block height"))?;
            self.uniqueness.remove(fingerprint, height)?;
        }

        let mut batch = WriteBatch::new();
        let changes = self.coins.pending_changes();
        self.coins.parent().stage_changes(&mut batch, &changes);
        delete_block_undo(&mut batch, &tip.hash);
        self.uniqueness.stage(&mut batch);
        self.chain.clear_height_hash(&mut batch, tip.height);
        if tip.height == 0 {
            self.chain.clear_tip(&mut batch);
        } else {
            self.chain.set_tip(&mut batch, &tip.prev_hash);
        }
        self.commit(&batch)?;
        self.coins.mark_flushed();
        Ok(())
    }

    /// Writes anything still cached to the store.
    pub fn flush(&mut self) -> Result<(), LedgerError> {
        Ok(self.coins.flush()?)
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), LedgerError> {
        if let Err(err) = self.store.write_batch(batch) {
            log_warn!(
                cat: Category::CoinDb,
                "ledger commit of {} writes failed: {err}",
                batch.len()
            );
            return Err(err.into());
        }
        Ok(())
    }
}

/// Only the transaction at index 1 may be a coinstake, and only its kernel
/// input may be a zerocoin spend. Anything else would skip stake validation.
fn check_stake_slots(block: &Block) -> Result<(), LedgerError> {
    for (index, tx) in block.transactions.iter().enumerate() {
        if index == 1 && tx.is_coinstake() {
            if tx.vin.iter().skip(1).any(TxIn::is_zerocoin_spend) {
                return Err(LedgerError::InvalidBlock(
                    "coinstake spends zerocoin past its kernel input",
                ));
            }
            continue;
        }
        if index > 1 && tx.is_coinstake() {
            return Err(LedgerError::InvalidBlock("coinstake outside the stake slot"));
        }
        if tx.has_zerocoin_spend_inputs() {
            return Err(LedgerError::InvalidBlock("zerocoin spend outside the coinstake"));
        }
    }
    Ok(())
}

/// Inputs that spend a tracked coin. Zerocoin spends carry no outpoint.
fn tracked_inputs(tx: &Transaction) -> impl Iterator<Item = &TxIn> {
    tx.vin.iter().filter(|txin| !txin.is_zerocoin_spend())
}

/// Outputs that become coins. The coinstake marker, zerocoin mints and
/// unspendable scripts do not.
fn tracked_outputs(tx: &Transaction) -> impl Iterator<Item = (u32, &TxOut)> {
    tx.vout
        .iter()
        .enumerate()
        .filter(|(_, out)| {
            !out.is_empty()
                && !is_unspendable(&out.script_pubkey)
                && classify_script_pubkey(&out.script_pubkey) != ScriptType::ZerocoinMint
        })
        .map(|(index, out)| (index as u32, out))
}
