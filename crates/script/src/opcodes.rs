//! Opcode values used by standard and legacy zerocoin scripts.

pub use flsd_primitives::transaction::{OP_ZEROCOINPUBLICSPEND, OP_ZEROCOINSPEND};

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_NOP: u8 = 0x61;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
pub const OP_CHECKCOLDSTAKEVERIFY: u8 = 0xd1;
pub const OP_ZEROCOINMINT: u8 = 0xc1;

/// Mnemonic for non-push opcodes, as printed in script asm.
pub fn opcode_name(op: u8) -> &'static str {
    match op {
        OP_0 => "0",
        OP_1NEGATE => "-1",
        0x50 => "OP_RESERVED",
        OP_1..=OP_16 => SMALL_INTS[(op - OP_1) as usize],
        OP_NOP => "OP_NOP",
        0x63 => "OP_IF",
        0x64 => "OP_NOTIF",
        0x67 => "OP_ELSE",
        0x68 => "OP_ENDIF",
        0x69 => "OP_VERIFY",
        OP_RETURN => "OP_RETURN",
        0x75 => "OP_DROP",
        OP_DUP => "OP_DUP",
        0x82 => "OP_SIZE",
        OP_EQUAL => "OP_EQUAL",
        OP_EQUALVERIFY => "OP_EQUALVERIFY",
        0xa6 => "OP_RIPEMD160",
        0xa8 => "OP_SHA256",
        OP_HASH160 => "OP_HASH160",
        0xaa => "OP_HASH256",
        OP_CHECKSIG => "OP_CHECKSIG",
        0xad => "OP_CHECKSIGVERIFY",
        OP_CHECKMULTISIG => "OP_CHECKMULTISIG",
        0xaf => "OP_CHECKMULTISIGVERIFY",
        OP_CHECKLOCKTIMEVERIFY => "OP_CHECKLOCKTIMEVERIFY",
        OP_ZEROCOINMINT => "OP_ZEROCOINMINT",
        OP_ZEROCOINSPEND => "OP_ZEROCOINSPEND",
        OP_ZEROCOINPUBLICSPEND => "OP_ZEROCOINPUBLICSPEND",
        OP_CHECKCOLDSTAKEVERIFY => "OP_CHECKCOLDSTAKEVERIFY",
        _ => "OP_UNKNOWN",
    }
}

const SMALL_INTS: [&str; 16] = [
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16",
];
