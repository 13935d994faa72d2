#![cfg(feature = "fjall")]

use flsd_storage::fjall::{FjallOptions, FjallStore};
use flsd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_smoke_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");

    let store = FjallStore::open(dir.path()).expect("open fjall");
    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"key", b"value");
    batch.put(Column::Coins, b"prefix:1", b"a");
    batch.put(Column::Coins, b"prefix:2", b"b");
    batch.put(Column::Coins, b"other", b"c");
    store.write_batch(&batch).expect("commit");

    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );
    assert_eq!(store.get(Column::Coins, b"key").expect("get"), None);
    let found = store.scan_prefix(Column::Coins, b"prefix:").expect("scan");
    assert_eq!(
        found,
        vec![
            (b"prefix:1".to_vec(), b"a".to_vec()),
            (b"prefix:2".to_vec(), b"b".to_vec()),
        ]
    );

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"batch", b"ok");
    batch.delete(Column::Meta, b"key");
    store.write_batch(&batch).expect("batch commit");
    assert!(!store.contains(Column::Meta, b"key").expect("contains"));
}

#[test]
fn fjall_reopen_keeps_synced_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = FjallOptions {
        sync_writes: true,
        ..FjallOptions::default()
    };
    {
        let store = FjallStore::open_with_options(dir.path(), options.clone()).expect("open");
        let mut batch = WriteBatch::new();
        batch.put(Column::StakeSerial, [7u8; 33], 42u32.to_le_bytes());
        store.write_batch(&batch).expect("commit");
        store.persist().expect("persist");
    }
    let store = FjallStore::open_with_options(dir.path(), options).expect("reopen");
    assert_eq!(
        store.get(Column::StakeSerial, &[7u8; 33]).expect("get"),
        Some(42u32.to_le_bytes().to_vec())
    );
}
