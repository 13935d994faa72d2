//! Transaction types and serialization.

use flsd_consensus::money::Amount;
use flsd_consensus::Hash256;

use crate::encoding::{encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const CURRENT_VERSION: i32 = 1;

/// Leading opcode of a private legacy zerocoin spend input.
pub const OP_ZEROCOINSPEND: u8 = 0xc2;
/// Leading opcode of a public legacy zerocoin spend input.
pub const OP_ZEROCOINPUBLICSPEND: u8 = 0xc3;

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }
    }

    /// True when this input spends a legacy zerocoin instead of an outpoint.
    pub fn is_zerocoin_spend(&self) -> bool {
        matches!(
            self.script_sig.first(),
            Some(&OP_ZEROCOINSPEND) | Some(&OP_ZEROCOINPUBLICSPEND)
        )
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// The zero-value marker output that opens every coinstake.
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Self {
        Self {
            version: CURRENT_VERSION,
            vin,
            vout,
            lock_time: 0,
        }
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&encode(self))
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null() && !self.vin[0].is_zerocoin_spend()
    }

    /// A coinstake spends at least one input (an outpoint, or a legacy zerocoin
    /// spend) and opens its outputs with an empty marker.
    pub fn is_coinstake(&self) -> bool {
        let Some(first) = self.vin.first() else {
            return false;
        };
        if first.prevout.is_null() && !first.is_zerocoin_spend() {
            return false;
        }
        self.vout.len() >= 2 && self.vout[0].is_empty()
    }

    pub fn has_zerocoin_spend_inputs(&self) -> bool {
        self.vin.iter().any(TxIn::is_zerocoin_spend)
    }

    pub fn value_out(&self) -> Amount {
        self.vout.iter().map(|out| out.value).sum()
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_vec(&self.vin);
        encoder.write_vec(&self.vout);
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin = decoder.read_vec()?;
        let vout = decoder.read_vec()?;
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}
