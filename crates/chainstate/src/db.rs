//! Store-backed bottom of the coin view stack.

use std::sync::Arc;

use flsd_consensus::Hash256;
use flsd_log::{log_debug, Category};
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::{Coin, OutPointKey};
use crate::view::{CoinChanges, CoinView, CoinViewMut, CoinsError};

const META_COINS_BEST_BLOCK_KEY: &[u8] = b"coins_best_block";

/// Spentness at this layer is absence: a spend deletes the record.
pub struct CoinsDb<S> {
    store: Arc<S>,
}

impl<S> Clone for CoinsDb<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> CoinsDb<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Adds `changes` to `batch` without committing it.
    pub fn stage_changes(&self, batch: &mut WriteBatch, changes: &CoinChanges) {
        for (outpoint, change) in &changes.entries {
            let key = OutPointKey::new(outpoint);
            match &change.coin {
                Some(coin) => batch.put(Column::Coins, key.as_bytes(), coin.encode()),
                None => batch.delete(Column::Coins, key.as_bytes()),
            }
        }
        if let Some(hash) = &changes.best_block {
            batch.put(Column::Meta, META_COINS_BEST_BLOCK_KEY, *hash);
        }
    }

    pub fn coin_count(&self) -> Result<usize, StoreError> {
        Ok(self.store.scan_prefix(Column::Coins, &[])?.len())
    }
}

impl<S: KeyValueStore> CoinView for CoinsDb<S> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, StoreError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Coins, key.as_bytes())? {
            Some(bytes) => Coin::decode(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Backend(format!("coin {outpoint}: {err}"))),
            None => Ok(None),
        }
    }

    fn have_coin(&self, outpoint: &OutPoint) -> Result<bool, StoreError> {
        self.store
            .contains(Column::Coins, OutPointKey::new(outpoint).as_bytes())
    }

    fn best_block(&self) -> Result<Option<Hash256>, StoreError> {
        match self.store.get(Column::Meta, META_COINS_BEST_BLOCK_KEY)? {
            Some(bytes) => {
                let hash: Hash256 = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Backend("invalid coins best block".to_string()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore> CoinViewMut for CoinsDb<S> {
    fn write_changes(&mut self, changes: CoinChanges) -> Result<(), CoinsError> {
        let mut batch = WriteBatch::new();
        self.stage_changes(&mut batch, &changes);
        self.store.write_batch(&batch)?;
        log_debug!(cat: Category::CoinDb, "wrote {} coin changes", changes.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::CoinsViewCache;
    use flsd_primitives::transaction::TxOut;
    use flsd_storage::memory::MemoryStore;

    fn coin(value: i64, height: u32) -> Coin {
        Coin::new(TxOut::new(value, vec![0x51]), height, false, false)
    }

    #[test]
    fn flush_writes_records_and_deletes_spent_ones() {
        let store = Arc::new(MemoryStore::new());
        let a = OutPoint::new([1u8; 32], 0);
        let b = OutPoint::new([2u8; 32], 1);

        let mut cache = CoinsViewCache::new(CoinsDb::new(Arc::clone(&store)));
        cache.add_coin(a.clone(), coin(5, 1), false).expect("add");
        cache.add_coin(b.clone(), coin(6, 1), false).expect("add");
        cache.set_best_block([3u8; 32]);
        cache.flush().expect("flush");
        assert_eq!(store.len(Column::Coins).expect("len"), 2);

        cache.spend_coin(&a).expect("spend");
        cache.flush().expect("flush");

        let db = CoinsDb::new(store);
        assert_eq!(db.coin(&a).expect("coin"), None);
        assert_eq!(db.coin(&b).expect("coin"), Some(coin(6, 1)));
        assert!(db.have_coin(&b).expect("have"));
        assert_eq!(db.best_block().expect("best"), Some([3u8; 32]));
        assert_eq!(db.coin_count().expect("count"), 1);
    }
}
