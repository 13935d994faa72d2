//! Coin status queries for external readers.

use flsd_consensus::Hash256;
use flsd_log::{log_debug, Category};
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::{KeyValueStore, StoreError};

use crate::coins::Coin;
use crate::ledger::{LedgerError, LedgerState};
use crate::mempool_view::{MempoolCoinsView, PendingPool};
use crate::view::{CoinView, CoinsViewCache};

/// Most outpoints a single lookup may ask about.
pub const MAX_LOOKUP_OUTPOINTS: usize = 15;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinLookup {
    pub chain_height: i32,
    pub chain_tip: Hash256,
    /// One flag per requested outpoint, in request order.
    pub hits: Vec<bool>,
    /// Coins for the hits, in request order.
    pub coins: Vec<Coin>,
}

impl CoinLookup {
    /// Hit flags packed eight per byte, least significant bit first.
    pub fn bitmap(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.hits.len().div_ceil(8)];
        for (i, hit) in self.hits.iter().enumerate() {
            if *hit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        bytes
    }

    /// Hit flags as a string of `1`s and `0`s.
    pub fn bitmap_string(&self) -> String {
        self.hits
            .iter()
            .map(|hit| if *hit { '1' } else { '0' })
            .collect()
    }
}

impl<S: KeyValueStore> LedgerState<S> {
    /// Looks up `outpoints` in the committed coin set. With `check_mempool`
    /// the lookup goes through a per-request overlay of `pool`; an output a
    /// pooled transaction already spends is always reported missing.
    pub fn lookup_coins<M: PendingPool + ?Sized>(
        &self,
        outpoints: &[OutPoint],
        pool: &M,
        check_mempool: bool,
    ) -> Result<CoinLookup, LedgerError> {
        if outpoints.len() > MAX_LOOKUP_OUTPOINTS {
            return Err(LedgerError::TooManyOutpoints {
                max: MAX_LOOKUP_OUTPOINTS,
                tried: outpoints.len(),
            });
        }
        let (chain_height, chain_tip) = match self.tip()? {
            Some(tip) => (tip.height, tip.hash),
            None => (-1, [0u8; 32]),
        };

        let (hits, coins) = if check_mempool {
            let request_view = CoinsViewCache::new(MempoolCoinsView::new(self.coins(), pool));
            collect(&request_view, pool, outpoints)?
        } else {
            collect(self.coins(), pool, outpoints)?
        };
        log_debug!(
            cat: Category::Rest,
            "coin lookup of {} outpoints found {}",
            outpoints.len(),
            coins.len()
        );
        Ok(CoinLookup {
            chain_height,
            chain_tip,
            hits,
            coins,
        })
    }
}

fn collect<V: CoinView, M: PendingPool + ?Sized>(
    view: &V,
    pool: &M,
    outpoints: &[OutPoint],
) -> Result<(Vec<bool>, Vec<Coin>), StoreError> {
    let mut hits = Vec::with_capacity(outpoints.len());
    let mut coins = Vec::new();
    for outpoint in outpoints {
        match view.coin(outpoint)? {
            Some(coin) if !pool.is_spent(outpoint) => {
                hits.push(true);
                coins.push(coin);
            }
            _ => hits.push(false),
        }
    }
    Ok((hits, coins))
}
