//! Read-only overlay that answers as if pending transactions were confirmed.

use flsd_consensus::Hash256;
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::TxOut;
use flsd_storage::StoreError;

use crate::coins::{Coin, MEMPOOL_HEIGHT};
use crate::view::CoinView;

/// What the ledger needs to know about not-yet-confirmed transactions.
pub trait PendingPool {
    /// Output `outpoint` if a pooled transaction creates it.
    fn pending_output(&self, outpoint: &OutPoint) -> Option<TxOut>;
    /// Whether a pooled transaction already spends `outpoint`.
    fn is_spent(&self, outpoint: &OutPoint) -> bool;
}

impl<T: PendingPool + ?Sized> PendingPool for &T {
    fn pending_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
        (**self).pending_output(outpoint)
    }

    fn is_spent(&self, outpoint: &OutPoint) -> bool {
        (**self).is_spent(outpoint)
    }
}

/// A pool with nothing in it.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyPool;

impl PendingPool for EmptyPool {
    fn pending_output(&self, _outpoint: &OutPoint) -> Option<TxOut> {
        None
    }

    fn is_spent(&self, _outpoint: &OutPoint) -> bool {
        false
    }
}

/// Built per request on top of a shared handle and dropped afterwards. It
/// implements only [`CoinView`], so nothing can be written through it.
pub struct MempoolCoinsView<'a, B, M: ?Sized> {
    base: B,
    pool: &'a M,
}

impl<'a, B, M: ?Sized> MempoolCoinsView<'a, B, M> {
    pub fn new(base: B, pool: &'a M) -> Self {
        Self { base, pool }
    }
}

impl<B: CoinView, M: PendingPool + ?Sized> CoinView for MempoolCoinsView<'_, B, M> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if let Some(out) = self.pool.pending_output(outpoint) {
            if self.pool.is_spent(outpoint) {
                return Ok(None);
            }
            return Ok(Some(Coin::new(out, MEMPOOL_HEIGHT, false, false)));
        }
        self.base.coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        self.base.best_block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use crate::view::{CoinsViewCache, EmptyCoinView};

    #[derive(Default)]
    struct Pool {
        outputs: HashMap<OutPoint, TxOut>,
        spent: HashSet<OutPoint>,
    }

    impl PendingPool for Pool {
        fn pending_output(&self, outpoint: &OutPoint) -> Option<TxOut> {
            self.outputs.get(outpoint).cloned()
        }

        fn is_spent(&self, outpoint: &OutPoint) -> bool {
            self.spent.contains(outpoint)
        }
    }

    #[test]
    fn pooled_outputs_shadow_the_base_without_touching_it() {
        let confirmed = OutPoint::new([1u8; 32], 0);
        let pending = OutPoint::new([2u8; 32], 0);
        let consumed = OutPoint::new([2u8; 32], 1);

        let mut authoritative = CoinsViewCache::new(EmptyCoinView);
        let confirmed_coin = Coin::new(TxOut::new(10, vec![0x51]), 5, false, false);
        authoritative
            .add_coin(confirmed.clone(), confirmed_coin.clone(), false)
            .expect("add");

        let mut pool = Pool::default();
        pool.outputs.insert(pending.clone(), TxOut::new(20, vec![0x52]));
        pool.outputs.insert(consumed.clone(), TxOut::new(30, vec![0x53]));
        pool.spent.insert(consumed.clone());

        {
            let overlay = MempoolCoinsView::new(&authoritative, &pool);
            let request_view = CoinsViewCache::new(overlay);
            let coin = request_view.coin(&pending).expect("coin").expect("pooled");
            assert_eq!(coin.height, MEMPOOL_HEIGHT);
            assert_eq!(coin.out.value, 20);
            assert_eq!(request_view.coin(&consumed).expect("coin"), None);
            assert_eq!(
                request_view.coin(&confirmed).expect("coin"),
                Some(confirmed_coin)
            );
        }

        assert_eq!(authoritative.coin(&pending).expect("coin"), None);
        let fresh_stack = CoinsViewCache::new(&authoritative);
        assert_eq!(fresh_stack.coin(&pending).expect("coin"), None);
        assert_eq!(authoritative.cache_size(), 1);
    }
}
