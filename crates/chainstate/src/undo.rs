use flsd_consensus::Hash256;
use flsd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::coins::Coin;
use crate::uniqueness::Fingerprint;

const BLOCK_UNDO_VERSION: u8 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentCoin {
    pub outpoint: OutPoint,
    pub coin: Coin,
}

/// Everything needed to disconnect a block: the coins it spent, in spend
/// order, and the stake fingerprint it recorded.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    pub spent: Vec<SpentCoin>,
    pub stake_fingerprint: Option<Fingerprint>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_u32_le(self.spent.len() as u32);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_var_bytes(&spent.coin.encode());
        }
        match &self.stake_fingerprint {
            Some(fingerprint) => {
                encoder.write_u8(1);
                encoder.write_bytes(fingerprint.as_bytes());
            }
            None => encoder.write_u8(0),
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let version = decoder.read_u8()?;
        if version != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let spent_len = decoder.read_u32_le()? as usize;
        let mut spent = Vec::with_capacity(spent_len.min(4096));
        for _ in 0..spent_len {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let coin_bytes = decoder.read_var_bytes()?;
            let coin = Coin::decode(&coin_bytes)
                .map_err(|_| DecodeError::InvalidData("invalid coin in undo"))?;
            spent.push(SpentCoin { outpoint, coin });
        }
        let stake_fingerprint = if decoder.read_bool()? {
            let raw = decoder.read_fixed::<33>()?;
            Some(
                Fingerprint::from_slice(&raw)
                    .ok_or(DecodeError::InvalidData("invalid stake fingerprint in undo"))?,
            )
        } else {
            None
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            spent,
            stake_fingerprint,
        })
    }
}

pub fn put_block_undo(batch: &mut WriteBatch, hash: &Hash256, undo: &BlockUndo) {
    batch.put(Column::BlockUndo, hash, undo.encode());
}

pub fn delete_block_undo(batch: &mut WriteBatch, hash: &Hash256) {
    batch.delete(Column::BlockUndo, hash);
}

pub fn get_block_undo<S: KeyValueStore + ?Sized>(
    store: &S,
    hash: &Hash256,
) -> Result<Option<BlockUndo>, StoreError> {
    match store.get(Column::BlockUndo, hash)? {
        Some(bytes) => BlockUndo::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(format!("block undo: {err}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flsd_primitives::transaction::TxOut;

    #[test]
    fn undo_keeps_spend_order_and_fingerprint() {
        let undo = BlockUndo {
            spent: vec![
                SpentCoin {
                    outpoint: OutPoint::new([2u8; 32], 1),
                    coin: Coin::new(TxOut::new(7, vec![0x51]), 3, true, false),
                },
                SpentCoin {
                    outpoint: OutPoint::new([1u8; 32], 0),
                    coin: Coin::new(TxOut::new(8, vec![0x52]), 4, false, true),
                },
            ],
            stake_fingerprint: Some(Fingerprint::transparent(&OutPoint::new([1u8; 32], 0))),
        };
        let bytes = undo.encode();
        assert_eq!(BlockUndo::decode(&bytes).expect("decode"), undo);

        let mut truncated = bytes.clone();
        truncated.pop();
        assert!(BlockUndo::decode(&truncated).is_err());

        let mut wrong_version = bytes;
        wrong_version[0] = 9;
        assert!(BlockUndo::decode(&wrong_version).is_err());
    }
}
