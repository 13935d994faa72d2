//! Hex helpers. Hashes are displayed byte-reversed, as the RPC and REST
//! interfaces print them.

use flsd_consensus::Hash256;

const HEX: &[u8; 16] = b"0123456789abcdef";

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    bytes_to_hex(&reversed)
}

/// Decodes an even-length hex string. Returns `None` on any non-hex character.
pub fn hex_to_bytes(input: &str) -> Option<Vec<u8>> {
    let input = input.trim();
    if input.len() % 2 != 0 {
        return None;
    }
    input
        .as_bytes()
        .chunks(2)
        .map(|pair| Some((nibble(pair[0])? << 4) | nibble(pair[1])?))
        .collect()
}

fn nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = [0x00, 0x7f, 0xab, 0xff];
        assert_eq!(bytes_to_hex(&bytes), "007fabff");
        assert_eq!(hex_to_bytes("007FabfF"), Some(bytes.to_vec()));
        assert_eq!(hex_to_bytes("abc"), None);
        assert_eq!(hex_to_bytes("zz"), None);
    }

    #[test]
    fn hash_is_reversed_for_display() {
        let mut hash = [0u8; 32];
        hash[0] = 0x01;
        let hex = hash256_to_hex(&hash);
        assert!(hex.ends_with("01"));
        assert!(hex.starts_with("00"));
    }
}
