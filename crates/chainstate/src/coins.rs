//! Coin records and their storage keys.

use flsd_consensus::constants::MAX_SCRIPT_SIZE;
use flsd_consensus::money::Amount;
use flsd_primitives::encoding::{DecodeError, Decoder, Encoder};
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::TxOut;
use flsd_script::opcodes::OP_RETURN;

pub const OUTPOINT_KEY_LEN: usize = 36;

/// Height reported for outputs that only exist in the pending pool.
pub const MEMPOOL_HEIGHT: u32 = 0x7fff_ffff;

const FLAG_COINBASE: u8 = 1 << 0;
const FLAG_COINSTAKE: u8 = 1 << 1;

/// An unspent transaction output together with where it was confirmed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub out: TxOut,
    pub height: u32,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
}

impl Coin {
    pub fn new(out: TxOut, height: u32, is_coinbase: bool, is_coinstake: bool) -> Self {
        Self {
            out,
            height,
            is_coinbase,
            is_coinstake,
        }
    }

    pub fn value(&self) -> Amount {
        self.out.value
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.out.value);
        encoder.write_var_bytes(&self.out.script_pubkey);
        encoder.write_u32_le(self.height);
        let mut flags = 0u8;
        if self.is_coinbase {
            flags |= FLAG_COINBASE;
        }
        if self.is_coinstake {
            flags |= FLAG_COINSTAKE;
        }
        encoder.write_u8(flags);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let flags = decoder.read_u8()?;
        if flags & !(FLAG_COINBASE | FLAG_COINSTAKE) != 0 {
            return Err(DecodeError::InvalidData("unknown coin flags"));
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            out: TxOut::new(value, script_pubkey),
            height,
            is_coinbase: flags & FLAG_COINBASE != 0,
            is_coinstake: flags & FLAG_COINSTAKE != 0,
        })
    }
}

/// Outputs that can never be spent are not worth tracking.
pub fn is_unspendable(script_pubkey: &[u8]) -> bool {
    script_pubkey.first() == Some(&OP_RETURN) || script_pubkey.len() > MAX_SCRIPT_SIZE
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; OUTPOINT_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn outpoint(&self) -> OutPoint {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[..32]);
        let index = u32::from_le_bytes([self.0[32], self.0[33], self.0[34], self.0[35]]);
        OutPoint::new(hash, index)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_survive_encoding() {
        let coin = Coin::new(TxOut::new(42, vec![0x51]), 7, false, true);
        let decoded = Coin::decode(&coin.encode()).expect("decode");
        assert_eq!(decoded, coin);

        let mut bytes = coin.encode();
        *bytes.last_mut().expect("flags") = 0x80;
        assert!(Coin::decode(&bytes).is_err());
    }

    #[test]
    fn key_maps_back_to_outpoint() {
        let outpoint = OutPoint::new([9u8; 32], 0x0102_0304);
        let key = OutPointKey::new(&outpoint);
        assert_eq!(&key.as_bytes()[32..], &[4, 3, 2, 1]);
        assert_eq!(OutPointKey::from_slice(key.as_bytes()), Some(key));
        assert_eq!(key.outpoint(), outpoint);
        assert_eq!(OutPointKey::from_slice(&[0u8; 35]), None);
    }

    #[test]
    fn unspendable_scripts() {
        assert!(is_unspendable(&[OP_RETURN, 0x01, 0xff]));
        assert!(is_unspendable(&vec![0x51; MAX_SCRIPT_SIZE + 1]));
        assert!(!is_unspendable(&[0x51]));
        assert!(!is_unspendable(&[]));
    }
}
