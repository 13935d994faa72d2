use flsd_storage::{Column, WriteBatch};

#[test]
fn column_index_and_bit_are_stable() {
    let mut seen = 0u32;
    for (idx, column) in Column::ALL.iter().copied().enumerate() {
        assert_eq!(column.index(), idx);
        assert_eq!(column.bit(), 1u32 << idx);
        assert_eq!(seen & column.bit(), 0, "duplicate bit for {column:?}");
        seen |= column.bit();
    }
    assert_eq!(seen.count_ones() as usize, Column::ALL.len());
}

#[test]
fn column_names_are_unique() {
    let mut names: Vec<_> = Column::ALL.iter().map(|column| column.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), Column::ALL.len());
}

#[test]
fn batch_tracks_touched_columns() {
    let mut batch = WriteBatch::new();
    assert!(batch.is_empty());
    batch.put(Column::Coins, [1u8; 36], vec![0u8; 10]);
    let mut other = WriteBatch::new();
    other.delete(Column::StakeSerial, [2u8; 33]);
    batch.append(other);
    assert_eq!(batch.len(), 2);
    assert_eq!(
        batch.touched(),
        Column::Coins.bit() | Column::StakeSerial.bit()
    );
}
