//! Script disassembly.

use flsd_primitives::hex::bytes_to_hex;

use crate::opcodes::{opcode_name, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

/// Iterates over a script's instructions. Yields `Err(())` once on a push that
/// runs past the end of the script, then stops.
pub struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    failed: bool,
}

pub fn instructions(script: &[u8]) -> Instructions<'_> {
    Instructions {
        script,
        cursor: 0,
        failed: false,
    }
}

impl<'a> Instructions<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.cursor.checked_add(len)?;
        let slice = self.script.get(self.cursor..end)?;
        self.cursor = end;
        Some(slice)
    }

    fn push_len(&mut self, op: u8) -> Option<usize> {
        match op {
            0x01..=0x4b => Some(op as usize),
            OP_PUSHDATA1 => self.take(1).map(|b| b[0] as usize),
            OP_PUSHDATA2 => self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]) as usize),
            OP_PUSHDATA4 => self
                .take(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize),
            _ => None,
        }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.script.len() {
            return None;
        }
        let op = self.script[self.cursor];
        self.cursor += 1;
        if !(0x01..=OP_PUSHDATA4).contains(&op) {
            return Some(Ok(Instruction::Op(op)));
        }
        let data = self.push_len(op).and_then(|len| self.take(len));
        match data {
            Some(data) => Some(Ok(Instruction::Push(data))),
            None => {
                self.failed = true;
                Some(Err(()))
            }
        }
    }
}

/// Human-readable disassembly: pushes as hex, opcodes by mnemonic.
pub fn script_to_asm(script: &[u8]) -> String {
    let mut parts = Vec::new();
    for instruction in instructions(script) {
        match instruction {
            Ok(Instruction::Push(data)) => parts.push(bytes_to_hex(data)),
            Ok(Instruction::Op(op)) => parts.push(opcode_name(op).to_string()),
            Err(()) => {
                parts.push("[error]".to_string());
                break;
            }
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_p2pkh() {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[0xab; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        assert_eq!(
            script_to_asm(&script),
            format!("OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG", "ab".repeat(20))
        );
    }

    #[test]
    fn truncated_push_is_reported() {
        assert_eq!(script_to_asm(&[0x51, 0x05, 0x01]), "1 [error]");
        assert_eq!(script_to_asm(&[OP_PUSHDATA1]), "[error]");
    }

    #[test]
    fn pushdata_forms() {
        let script = [OP_PUSHDATA1, 0x02, 0xca, 0xfe, OP_PUSHDATA2, 0x01, 0x00, 0x07];
        let parsed: Vec<_> = instructions(&script).collect();
        assert_eq!(
            parsed,
            vec![
                Ok(Instruction::Push(&[0xca, 0xfe][..])),
                Ok(Instruction::Push(&[0x07][..])),
            ]
        );
    }
}
