//! Standard script classification utilities.

use crate::asm::{instructions, Instruction};
use crate::opcodes::{
    OP_1, OP_16, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_HASH160,
    OP_RETURN, OP_ZEROCOINMINT,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Multisig,
    NullData,
    ZerocoinMint,
    Unknown,
}

impl ScriptType {
    /// Name used by the RPC and REST `type` field.
    pub fn name(self) -> &'static str {
        match self {
            ScriptType::P2Pk => "pubkey",
            ScriptType::P2Pkh => "pubkeyhash",
            ScriptType::P2Sh => "scripthash",
            ScriptType::Multisig => "multisig",
            ScriptType::NullData => "nulldata",
            ScriptType::ZerocoinMint => "zerocoinmint",
            ScriptType::Unknown => "nonstandard",
        }
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if script.first() == Some(&OP_ZEROCOINMINT) {
        ScriptType::ZerocoinMint
    } else if is_null_data(script) {
        ScriptType::NullData
    } else if multisig_required(script).is_some() {
        ScriptType::Multisig
    } else {
        ScriptType::Unknown
    }
}

/// Number of signatures a standard output needs to be spent.
pub fn required_sigs(script: &[u8]) -> Option<u32> {
    match classify_script_pubkey(script) {
        ScriptType::P2Pk | ScriptType::P2Pkh | ScriptType::P2Sh => Some(1),
        ScriptType::Multisig => multisig_required(script),
        _ => None,
    }
}

pub fn p2pkh_script(key_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(key_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn p2pk_script(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(pubkey.len() + 2);
    script.push(pubkey.len() as u8);
    script.extend_from_slice(pubkey);
    script.push(OP_CHECKSIG);
    script
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) => len,
        Some(len @ 65) => len,
        _ => return false,
    };

    let expected_len = key_len as usize + 2;
    script.len() == expected_len && script[script.len() - 1] == OP_CHECKSIG
}

fn is_null_data(script: &[u8]) -> bool {
    if script.first() != Some(&OP_RETURN) {
        return false;
    }
    instructions(&script[1..]).all(|ins| matches!(ins, Ok(Instruction::Push(_))))
}

/// `m <key>... n OP_CHECKMULTISIG` with 1 <= m <= n <= 16; returns m.
fn multisig_required(script: &[u8]) -> Option<u32> {
    let parsed: Vec<_> = instructions(script).collect::<Result<_, _>>().ok()?;
    let (first, rest) = parsed.split_first()?;
    let (last, rest) = rest.split_last()?;
    let (count, keys) = rest.split_last()?;
    let small_int = |ins: &Instruction| match ins {
        Instruction::Op(op) if (OP_1..=OP_16).contains(op) => Some(u32::from(op - OP_1 + 1)),
        _ => None,
    };
    let required = small_int(first)?;
    let total = small_int(count)?;
    if *last != Instruction::Op(OP_CHECKMULTISIG)
        || required > total
        || keys.len() != total as usize
    {
        return None;
    }
    keys.iter()
        .all(|key| matches!(key, Instruction::Push(data) if data.len() == 33 || data.len() == 65))
        .then_some(required)
}
