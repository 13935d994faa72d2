//! Block header and block types.

use flsd_consensus::Hash256;

use crate::encoding::{encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::Transaction;

/// Headers from this version on commit to an accumulator checkpoint.
pub const ZEROCOIN_HEADER_VERSION: i32 = 4;
pub const CURRENT_VERSION: i32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// Eight packed 32-bit accumulator checksums, one per denomination,
    /// stored as a little-endian 256-bit integer.
    pub accumulator_checkpoint: Hash256,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&encode(self))
    }

    pub fn has_accumulator_checkpoint(&self) -> bool {
        self.version >= ZEROCOIN_HEADER_VERSION
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        if self.has_accumulator_checkpoint() {
            encoder.write_hash_le(&self.accumulator_checkpoint);
        }
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let accumulator_checkpoint = if version >= ZEROCOIN_HEADER_VERSION {
            decoder.read_hash_le()?
        } else {
            [0u8; 32]
        };
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
            accumulator_checkpoint,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Staker signature; empty on proof-of-work blocks.
    pub block_sig: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions
            .get(1)
            .is_some_and(Transaction::is_coinstake)
    }

    pub fn coinstake(&self) -> Option<&Transaction> {
        self.transactions.get(1).filter(|tx| tx.is_coinstake())
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        encoder.write_vec(&self.transactions);
        if self.is_proof_of_stake() {
            encoder.write_var_bytes(&self.block_sig);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let transactions: Vec<Transaction> = decoder.read_vec()?;
        let block_sig = if transactions.get(1).is_some_and(Transaction::is_coinstake) {
            decoder.read_var_bytes()?
        } else {
            Vec::new()
        };
        Ok(Self {
            header,
            transactions,
            block_sig,
        })
    }
}
