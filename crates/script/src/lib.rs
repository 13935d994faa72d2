//! Script opcodes, standard output classification and disassembly.

pub mod asm;
pub mod opcodes;
pub mod standard;
