//! Base58check transparent addresses.

use flsd_consensus::Network;

use crate::hash::{hash160, sha256d};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid address checksum"),
            AddressError::UnknownPrefix => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

struct Prefixes {
    pubkey: u8,
    script: u8,
}

fn prefixes(network: Network) -> Prefixes {
    match network {
        Network::Mainnet => Prefixes {
            pubkey: 30,
            script: 13,
        },
        Network::Testnet | Network::Regtest => Prefixes {
            pubkey: 139,
            script: 19,
        },
    }
}

pub fn address_to_script_pubkey(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    let payload = base58check_decode(address)?;
    let Some((&prefix, hash)) = payload.split_first() else {
        return Err(AddressError::InvalidLength);
    };
    if hash.len() != 20 {
        return Err(AddressError::InvalidLength);
    }
    let prefixes = prefixes(network);
    if prefix == prefixes.pubkey {
        let mut script = Vec::with_capacity(25);
        script.extend_from_slice(&[0x76, 0xa9, 0x14]);
        script.extend_from_slice(hash);
        script.extend_from_slice(&[0x88, 0xac]);
        return Ok(script);
    }
    if prefix == prefixes.script {
        let mut script = Vec::with_capacity(23);
        script.extend_from_slice(&[0xa9, 0x14]);
        script.extend_from_slice(hash);
        script.push(0x87);
        return Ok(script);
    }
    Err(AddressError::UnknownPrefix)
}

/// Address of a P2PKH, P2SH or P2PK output. Pay-to-pubkey outputs map to the
/// key's P2PKH address.
pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<String> {
    let prefixes = prefixes(network);
    let (prefix, hash) = match script {
        [0x76, 0xa9, 0x14, hash @ .., 0x88, 0xac] if hash.len() == 20 => {
            (prefixes.pubkey, hash.to_vec())
        }
        [0xa9, 0x14, hash @ .., 0x87] if hash.len() == 20 => (prefixes.script, hash.to_vec()),
        [len, key @ .., 0xac] if (*len == 33 || *len == 65) && key.len() == *len as usize => {
            (prefixes.pubkey, hash160(key).to_vec())
        }
        _ => return None,
    };
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(&hash);
    Some(base58check_encode(&payload))
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    data.extend_from_slice(&sha256d(payload)[..4]);

    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in &data {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let zeros = data.iter().take_while(|byte| **byte == 0).count();
    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|digit| ALPHABET[*digit as usize] as char));
    out
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for ch in input.bytes() {
        let mut carry = ALPHABET
            .iter()
            .position(|value| *value == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in bytes.iter_mut() {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let zeros = input.bytes().take_while(|ch| *ch == b'1').count();
    let mut data = vec![0u8; zeros];
    data.extend(bytes.iter().rev());

    if data.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = data.split_at(data.len() - 4);
    if checksum != &sha256d(payload)[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_roundtrip() {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[0x42; 20]);
        script.extend_from_slice(&[0x88, 0xac]);

        let address = script_pubkey_to_address(&script, Network::Mainnet).expect("address");
        assert!(address.starts_with('D'));
        assert_eq!(
            address_to_script_pubkey(&address, Network::Mainnet),
            Ok(script)
        );
        assert_eq!(
            address_to_script_pubkey(&address, Network::Testnet),
            Err(AddressError::UnknownPrefix)
        );
    }

    #[test]
    fn p2pk_maps_to_key_hash() {
        let mut script = vec![33];
        script.extend_from_slice(&[0x02; 33]);
        script.push(0xac);
        let address = script_pubkey_to_address(&script, Network::Regtest).expect("address");

        let mut p2pkh = vec![0x76, 0xa9, 0x14];
        p2pkh.extend_from_slice(&hash160(&[0x02; 33]));
        p2pkh.extend_from_slice(&[0x88, 0xac]);
        assert_eq!(address_to_script_pubkey(&address, Network::Regtest), Ok(p2pkh));
    }

    #[test]
    fn checksum_is_verified() {
        let mut script = vec![0xa9, 0x14];
        script.extend_from_slice(&[0x07; 20]);
        script.push(0x87);
        let mut address = script_pubkey_to_address(&script, Network::Testnet).expect("address");
        let last = address.pop().expect("non-empty");
        address.push(if last == '1' { '2' } else { '1' });
        assert!(address_to_script_pubkey(&address, Network::Testnet).is_err());
        assert_eq!(
            address_to_script_pubkey("0OIl", Network::Testnet),
            Err(AddressError::InvalidCharacter)
        );
    }
}
