//! Block index and active chain, backed by the storage trait.

use std::sync::Arc;

use flsd_consensus::{Denomination, Hash256};
use flsd_primitives::block::BlockHeader;
use flsd_primitives::encoding::{Decoder, Encoder};
use flsd_storage::{Column, KeyValueStore, StoreError, WriteBatch};
use primitive_types::U256;

const META_BEST_BLOCK_KEY: &[u8] = b"best_block";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub height: i32,
    pub time: u32,
    pub accumulator_checkpoint: Hash256,
}

impl BlockIndexEntry {
    pub fn from_header(header: &BlockHeader, height: i32) -> Self {
        Self {
            hash: header.hash(),
            prev_hash: header.prev_block,
            height,
            time: header.time,
            accumulator_checkpoint: header.accumulator_checkpoint,
        }
    }

    pub fn acc_checkpoint(&self) -> U256 {
        U256::from_little_endian(&self.accumulator_checkpoint)
    }
}

/// The 32-bit accumulator checksum of `denomination` inside a checkpoint.
pub fn parse_acc_checksum(checkpoint: U256, denomination: Denomination) -> u32 {
    let shifted = checkpoint >> (32 * denomination.position() as usize);
    (shifted & U256::from(u32::MAX)).low_u32()
}

/// Packs one checksum per denomination (in denomination order) into a checkpoint.
pub fn pack_acc_checkpoint(checksums: [u32; 8]) -> Hash256 {
    let value = checksums
        .iter()
        .enumerate()
        .fold(U256::zero(), |acc, (pos, checksum)| {
            acc | (U256::from(*checksum) << (32 * pos))
        });
    value.to_little_endian()
}

pub struct ChainIndex<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> ChainIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn entry(&self, hash: &Hash256) -> Result<Option<BlockIndexEntry>, StoreError> {
        let bytes = match self.store.get(Column::BlockIndex, hash)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_entry(hash, &bytes)
            .map(Some)
            .map_err(StoreError::Backend)
    }

    pub fn hash_at_height(&self, height: i32) -> Result<Option<Hash256>, StoreError> {
        if height < 0 {
            return Ok(None);
        }
        let bytes = match self.store.get(Column::HeightIndex, &height_key(height))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        decode_hash(&bytes).map(Some).map_err(StoreError::Backend)
    }

    pub fn entry_at_height(&self, height: i32) -> Result<Option<BlockIndexEntry>, StoreError> {
        match self.hash_at_height(height)? {
            Some(hash) => self.entry(&hash),
            None => Ok(None),
        }
    }

    pub fn tip(&self) -> Result<Option<BlockIndexEntry>, StoreError> {
        let hash = match self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? {
            Some(bytes) => decode_hash(&bytes).map_err(StoreError::Backend)?,
            None => return Ok(None),
        };
        self.entry(&hash)
    }

    /// Whether `entry` is part of the active chain.
    pub fn contains(&self, entry: &BlockIndexEntry) -> Result<bool, StoreError> {
        Ok(self.hash_at_height(entry.height)? == Some(entry.hash))
    }

    /// Successor of `entry` on the active chain.
    pub fn next(&self, entry: &BlockIndexEntry) -> Result<Option<BlockIndexEntry>, StoreError> {
        if !self.contains(entry)? {
            return Ok(None);
        }
        self.entry_at_height(entry.height + 1)
    }

    pub fn put_entry(&self, batch: &mut WriteBatch, entry: &BlockIndexEntry) {
        batch.put(Column::BlockIndex, entry.hash, encode_entry(entry));
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: i32, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), *hash);
    }

    pub fn clear_height_hash(&self, batch: &mut WriteBatch, height: i32) {
        batch.delete(Column::HeightIndex, height_key(height));
    }

    pub fn set_tip(&self, batch: &mut WriteBatch, hash: &Hash256) {
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, *hash);
    }

    pub fn clear_tip(&self, batch: &mut WriteBatch) {
        batch.delete(Column::Meta, META_BEST_BLOCK_KEY);
    }
}

pub fn height_key(height: i32) -> [u8; 4] {
    height.to_le_bytes()
}

fn encode_entry(entry: &BlockIndexEntry) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_hash_le(&entry.prev_hash);
    encoder.write_i32_le(entry.height);
    encoder.write_u32_le(entry.time);
    encoder.write_hash_le(&entry.accumulator_checkpoint);
    encoder.into_inner()
}

fn decode_entry(hash: &Hash256, bytes: &[u8]) -> Result<BlockIndexEntry, String> {
    let mut decoder = Decoder::new(bytes);
    let prev_hash = decoder.read_hash_le().map_err(|err| err.to_string())?;
    let height = decoder.read_i32_le().map_err(|err| err.to_string())?;
    let time = decoder.read_u32_le().map_err(|err| err.to_string())?;
    let accumulator_checkpoint = decoder.read_hash_le().map_err(|err| err.to_string())?;
    if !decoder.is_empty() {
        return Err("trailing bytes in block index entry".to_string());
    }
    Ok(BlockIndexEntry {
        hash: *hash,
        prev_hash,
        height,
        time,
        accumulator_checkpoint,
    })
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, String> {
    bytes
        .try_into()
        .map_err(|_| "invalid hash length".to_string())
}
