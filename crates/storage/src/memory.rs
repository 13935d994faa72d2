use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp, COLUMN_COUNT};

type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-process store, one ordered map per column. Used for tests and the
/// `memory` backend.
#[derive(Default)]
pub struct MemoryStore {
    columns: RwLock<[ColumnMap; COLUMN_COUNT]>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored in `column`.
    pub fn len(&self, column: Column) -> Result<usize, StoreError> {
        let guard = self
            .columns
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(guard[column.index()].len())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self
            .columns
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        Ok(guard[column.index()].get(key).cloned())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self
            .columns
            .read()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        let start: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(prefix), Bound::Unbounded);
        Ok(guard[column.index()]
            .range::<[u8], _>(start)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self
            .columns
            .write()
            .map_err(|_| StoreError::Poisoned("memory store"))?;
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard[column.index()]
                        .insert(key.as_slice().to_vec(), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    guard[column.index()].remove(key.as_slice());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stays_inside_column_and_prefix() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"ab1", b"x");
        batch.put(Column::Meta, b"ab2", b"y");
        batch.put(Column::Meta, b"ac", b"z");
        batch.put(Column::Coins, b"ab3", b"w");
        store.write_batch(&batch).expect("commit");

        let found = store.scan_prefix(Column::Meta, b"ab").expect("scan");
        assert_eq!(
            found,
            vec![
                (b"ab1".to_vec(), b"x".to_vec()),
                (b"ab2".to_vec(), b"y".to_vec())
            ]
        );
        assert_eq!(store.len(Column::Coins).expect("len"), 1);
    }

    #[test]
    fn later_ops_in_a_batch_win() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Coins, b"k", b"1");
        batch.delete(Column::Coins, b"k");
        batch.put(Column::StakeSerial, b"k", b"2");
        store.write_batch(&batch).expect("commit");

        assert!(!store.contains(Column::Coins, b"k").expect("contains"));
        assert_eq!(
            store.get(Column::StakeSerial, b"k").expect("get"),
            Some(b"2".to_vec())
        );
    }
}
