//! Layered coin views.
//!
//! A [`CoinsViewCache`] owns its local entries and holds its parent by value.
//! The parent can be a store-backed [`CoinsDb`](crate::db::CoinsDb), another
//! cache, or a borrowed handle to either. Shared handles (`&T`, `Arc<T>`) only
//! implement [`CoinView`], so a cache stacked on one can be read through but
//! never flushed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flsd_consensus::Hash256;
use flsd_log::{log_debug, log_warn, Category};
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::StoreError;

use crate::coins::{is_unspendable, Coin};

#[derive(Debug)]
pub enum CoinsError {
    Store(StoreError),
    /// Adding a coin over one that is still unspent.
    OverwriteUnspent(OutPoint),
    /// A child claimed an entry was new while the parent still holds it unspent.
    FreshMisapplied(OutPoint),
}

impl fmt::Display for CoinsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinsError::Store(err) => write!(f, "{err}"),
            CoinsError::OverwriteUnspent(outpoint) => {
                write!(f, "attempted to overwrite unspent coin {outpoint}")
            }
            CoinsError::FreshMisapplied(outpoint) => {
                write!(f, "fresh flag misapplied to unspent coin {outpoint}")
            }
        }
    }
}

impl std::error::Error for CoinsError {}

impl From<StoreError> for CoinsError {
    fn from(err: StoreError) -> Self {
        CoinsError::Store(err)
    }
}

/// Read access to a coin source. Lookups never populate caches.
pub trait CoinView {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError>;

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        Ok(self.coin(outpoint)?.is_some())
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError>;
}

/// A coin source that accepts a batch of changes from a child view.
pub trait CoinViewMut: CoinView {
    fn write_changes(&mut self, changes: CoinChanges) -> Result<(), CoinsError>;
}

impl<T: CoinView + ?Sized> CoinView for &T {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        (**self).coin(outpoint)
    }

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        (**self).have_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        (**self).best_block()
    }
}

impl<T: CoinView + ?Sized> CoinView for &mut T {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        (**self).coin(outpoint)
    }

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        (**self).have_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        (**self).best_block()
    }
}

impl<T: CoinView + ?Sized> CoinView for Arc<T> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        self.as_ref().coin(outpoint)
    }

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        self.as_ref().have_coin(outpoint)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        self.as_ref().best_block()
    }
}

impl<T: CoinViewMut + ?Sized> CoinViewMut for &mut T {
    fn write_changes(&mut self, changes: CoinChanges) -> Result<(), CoinsError> {
        (**self).write_changes(changes)
    }
}

/// A view with no coins, used as the bottom of throwaway stacks.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyCoinView;

impl CoinView for EmptyCoinView {
    fn coin(&self, _outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        Ok(None)
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        Ok(None)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoinChange {
    /// `None` marks a spend.
    pub coin: Option<Coin>,
    /// The child never saw this coin in its parent.
    pub fresh: bool,
}

/// Dirty entries of a cache, ordered by outpoint.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CoinChanges {
    pub entries: Vec<(OutPoint, CoinChange)>,
    pub best_block: Option<Hash256>,
}

impl CoinChanges {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.best_block.is_none()
    }
}

const DIRTY: u8 = 1 << 0;
const FRESH: u8 = 1 << 1;

#[derive(Clone, Debug)]
struct CacheEntry {
    coin: Option<Coin>,
    flags: u8,
}

impl CacheEntry {
    fn clean(coin: Coin) -> Self {
        Self {
            coin: Some(coin),
            flags: 0,
        }
    }

    fn is_dirty(&self) -> bool {
        self.flags & DIRTY != 0
    }

    fn is_fresh(&self) -> bool {
        self.flags & FRESH != 0
    }
}

pub struct CoinsViewCache<P> {
    parent: P,
    cache: HashMap<OutPoint, CacheEntry>,
    best_block: Option<Hash256>,
}

impl<P> CoinsViewCache<P> {
    pub fn new(parent: P) -> Self {
        Self {
            parent,
            cache: HashMap::new(),
            best_block: None,
        }
    }

    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Re-parents this cache. Cached entries, including unflushed ones, are kept.
    pub fn with_backend<Q>(self, parent: Q) -> CoinsViewCache<Q> {
        CoinsViewCache {
            parent,
            cache: self.cache,
            best_block: self.best_block,
        }
    }

    pub fn set_best_block(&mut self, hash: Hash256) {
        self.best_block = Some(hash);
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.cache.values().filter(|entry| entry.is_dirty()).count()
    }

    pub fn has_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.cache
            .get(outpoint)
            .is_some_and(|entry| entry.coin.is_some())
    }

    /// Drops a cached entry that carries no unflushed state.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        if self.cache.get(outpoint).is_some_and(|entry| entry.flags == 0) {
            self.cache.remove(outpoint);
        }
    }

    /// Snapshot of everything a flush would hand to the parent.
    pub fn pending_changes(&self) -> CoinChanges {
        let mut entries: Vec<(OutPoint, CoinChange)> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(outpoint, entry)| {
                (
                    outpoint.clone(),
                    CoinChange {
                        coin: entry.coin.clone(),
                        fresh: entry.is_fresh(),
                    },
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        CoinChanges {
            entries,
            best_block: self.best_block,
        }
    }

    /// Second half of a flush: the parent has durably accepted
    /// [`pending_changes`](Self::pending_changes).
    pub fn mark_flushed(&mut self) {
        self.cache.clear();
    }

    /// Throws away every unflushed change and falls back to the parent's best block.
    pub fn discard_changes(&mut self) {
        self.cache.retain(|_, entry| !entry.is_dirty());
        self.best_block = None;
    }
}

impl<P: CoinView> CoinsViewCache<P> {
    /// Makes sure `outpoint` is cached if the parent has it. Returns whether an
    /// entry (possibly spent) is now present.
    fn fetch(&mut self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        if self.cache.contains_key(outpoint) {
            return Ok(true);
        }
        match self.parent.coin(outpoint)? {
            Some(coin) => {
                self.cache.insert(outpoint.clone(), CacheEntry::clean(coin));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if !self.fetch(outpoint)? {
            return Ok(None);
        }
        Ok(self
            .cache
            .get(outpoint)
            .and_then(|entry| entry.coin.clone()))
    }

    /// Marks `outpoint` spent and returns the coin it held.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        if !self.fetch(outpoint)? {
            return Ok(None);
        }
        let Some(entry) = self.cache.get_mut(outpoint) else {
            return Ok(None);
        };
        let Some(coin) = entry.coin.take() else {
            return Ok(None);
        };
        if entry.is_fresh() {
            self.cache.remove(outpoint);
        } else {
            entry.flags |= DIRTY;
        }
        Ok(Some(coin))
    }

    pub fn add_coin(
        &mut self,
        outpoint: OutPoint,
        coin: Coin,
        possible_overwrite: bool,
    ) -> Result<(), CoinsError> {
        if is_unspendable(&coin.out.script_pubkey) {
            return Ok(());
        }
        let mut fresh = false;
        if !possible_overwrite {
            self.fetch(&outpoint)?;
            match self.cache.get(&outpoint) {
                Some(entry) if entry.coin.is_some() => {
                    return Err(CoinsError::OverwriteUnspent(outpoint));
                }
                // A spent entry the parent has not been told about must keep
                // its tombstone semantics.
                Some(entry) => fresh = !entry.is_dirty(),
                None => fresh = true,
            }
        }
        let entry = self.cache.entry(outpoint).or_insert(CacheEntry {
            coin: None,
            flags: 0,
        });
        entry.coin = Some(coin);
        entry.flags |= DIRTY | if fresh { FRESH } else { 0 };
        Ok(())
    }
}

impl<P: CoinViewMut> CoinsViewCache<P> {
    /// Pushes every dirty entry into the parent and empties the cache. On
    /// failure the cache is left untouched.
    pub fn flush(&mut self) -> Result<(), CoinsError> {
        let changes = self.pending_changes();
        let count = changes.len();
        if let Err(err) = self.parent.write_changes(changes) {
            log_warn!(cat: Category::CoinDb, "coin cache flush of {count} entries failed: {err}");
            return Err(err);
        }
        log_debug!(cat: Category::CoinDb, "flushed {count} coin entries");
        self.mark_flushed();
        Ok(())
    }
}

impl<P: CoinView> CoinView for CoinsViewCache<P> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        match self.cache.get(outpoint) {
            Some(entry) => Ok(entry.coin.clone()),
            None => self.parent.coin(outpoint),
        }
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        match self.best_block {
            Some(hash) => Ok(Some(hash)),
            None => self.parent.best_block(),
        }
    }
}

impl<P: CoinView> CoinViewMut for CoinsViewCache<P> {
    fn write_changes(&mut self, changes: CoinChanges) -> Result<(), CoinsError> {
        for (outpoint, change) in &changes.entries {
            let parent_unspent = self
                .cache
                .get(outpoint)
                .is_some_and(|entry| entry.coin.is_some());
            if change.fresh && parent_unspent {
                return Err(CoinsError::FreshMisapplied(outpoint.clone()));
            }
        }

        for (outpoint, change) in changes.entries {
            match self.cache.get_mut(&outpoint) {
                None => {
                    if change.fresh && change.coin.is_none() {
                        continue;
                    }
                    let flags = DIRTY | if change.fresh { FRESH } else { 0 };
                    self.cache.insert(
                        outpoint,
                        CacheEntry {
                            coin: change.coin,
                            flags,
                        },
                    );
                }
                Some(entry) => {
                    if entry.is_fresh() && change.coin.is_none() {
                        self.cache.remove(&outpoint);
                    } else {
                        entry.coin = change.coin;
                        entry.flags |= DIRTY;
                    }
                }
            }
        }
        if let Some(hash) = changes.best_block {
            self.best_block = Some(hash);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flsd_primitives::transaction::TxOut;

    fn outpoint(n: u8) -> OutPoint {
        OutPoint::new([n; 32], u32::from(n))
    }

    fn coin(value: i64) -> Coin {
        Coin::new(TxOut::new(value, vec![0x51]), 1, false, false)
    }

    #[test]
    fn lookups_do_not_populate_but_get_coin_does() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        parent.add_coin(outpoint(1), coin(10), false).expect("add");
        parent.mark_flushed_for_test();

        let mut child = CoinsViewCache::new(&parent);
        assert_eq!(child.coin(&outpoint(1)).expect("coin"), Some(coin(10)));
        assert_eq!(child.cache_size(), 0);
        assert_eq!(child.get_coin(&outpoint(1)).expect("get"), Some(coin(10)));
        assert_eq!(child.cache_size(), 1);
        assert_eq!(child.dirty_count(), 0);
    }

    #[test]
    fn fresh_spend_leaves_no_tombstone() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        {
            let mut child = CoinsViewCache::new(&mut parent);
            child.add_coin(outpoint(1), coin(10), false).expect("add");
            assert_eq!(child.spend_coin(&outpoint(1)).expect("spend"), Some(coin(10)));
            assert_eq!(child.cache_size(), 0);
            child.flush().expect("flush");
        }
        assert_eq!(parent.cache_size(), 0);
    }

    #[test]
    fn spend_of_parent_coin_is_forwarded() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        parent.add_coin(outpoint(2), coin(20), false).expect("add");
        parent.mark_flushed_for_test();

        {
            let mut child = CoinsViewCache::new(&mut parent);
            assert_eq!(child.get_coin(&outpoint(2)).expect("get"), Some(coin(20)));
            assert_eq!(child.dirty_count(), 0);
            child.spend_coin(&outpoint(2)).expect("spend");
            assert_eq!(child.dirty_count(), 1);
            child.flush().expect("flush");
        }
        assert_eq!(parent.coin(&outpoint(2)).expect("coin"), None);
        assert_eq!(parent.dirty_count(), 1);
    }

    #[test]
    fn overwrite_of_unspent_coin_is_rejected() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        parent.add_coin(outpoint(3), coin(30), false).expect("add");
        let mut child = CoinsViewCache::new(&parent);
        assert!(matches!(
            child.add_coin(outpoint(3), coin(31), false),
            Err(CoinsError::OverwriteUnspent(_))
        ));
        child.add_coin(outpoint(3), coin(31), true).expect("overwrite");
        assert_eq!(child.coin(&outpoint(3)).expect("coin"), Some(coin(31)));
        assert_eq!(parent.coin(&outpoint(3)).expect("coin"), Some(coin(30)));
    }

    #[test]
    fn fresh_change_over_unspent_parent_entry_fails_without_mutation() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        parent.add_coin(outpoint(4), coin(40), false).expect("add");
        let changes = CoinChanges {
            entries: vec![
                (
                    outpoint(1),
                    CoinChange {
                        coin: Some(coin(1)),
                        fresh: true,
                    },
                ),
                (
                    outpoint(4),
                    CoinChange {
                        coin: Some(coin(41)),
                        fresh: true,
                    },
                ),
            ],
            best_block: Some([7u8; 32]),
        };
        assert!(matches!(
            parent.write_changes(changes),
            Err(CoinsError::FreshMisapplied(_))
        ));
        assert_eq!(parent.coin(&outpoint(1)).expect("coin"), None);
        assert_eq!(parent.coin(&outpoint(4)).expect("coin"), Some(coin(40)));
        assert_eq!(parent.best_block().expect("best"), None);
    }

    #[test]
    fn uncache_keeps_dirty_entries() {
        let mut parent = CoinsViewCache::new(EmptyCoinView);
        parent.add_coin(outpoint(5), coin(50), false).expect("add");
        parent.mark_flushed_for_test();
        let mut child = CoinsViewCache::new(&parent);
        child.get_coin(&outpoint(5)).expect("get");
        child.add_coin(outpoint(6), coin(60), false).expect("add");
        assert!(child.has_in_cache(&outpoint(5)));

        child.uncache(&outpoint(5));
        child.uncache(&outpoint(6));
        assert!(!child.has_in_cache(&outpoint(5)));
        assert!(child.has_in_cache(&outpoint(6)));
    }

    #[test]
    fn unspendable_outputs_are_skipped() {
        let mut view = CoinsViewCache::new(EmptyCoinView);
        let burn = Coin::new(TxOut::new(5, vec![0x6a, 0x01, 0x00]), 1, false, false);
        view.add_coin(outpoint(7), burn, false).expect("add");
        assert_eq!(view.cache_size(), 0);
    }

    #[test]
    fn backend_swap_keeps_cached_entries() {
        let mut lower = CoinsViewCache::new(EmptyCoinView);
        lower.add_coin(outpoint(8), coin(80), false).expect("add");

        let mut top = CoinsViewCache::new(EmptyCoinView);
        top.add_coin(outpoint(9), coin(90), false).expect("add");
        assert_eq!(top.coin(&outpoint(8)).expect("coin"), None);

        let top = top.with_backend(&lower);
        assert_eq!(top.coin(&outpoint(8)).expect("coin"), Some(coin(80)));
        assert_eq!(top.coin(&outpoint(9)).expect("coin"), Some(coin(90)));
    }

    impl<P> CoinsViewCache<P> {
        /// Pretends the current entries were already written below, turning
        /// them into clean parent state.
        fn mark_flushed_for_test(&mut self) {
            for entry in self.cache.values_mut() {
                entry.flags = 0;
            }
        }
    }
}
