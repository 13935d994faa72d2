//! Transaction and block types with consensus serialization.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod hex;
pub mod outpoint;
pub mod transaction;

pub use address::{address_to_script_pubkey, script_pubkey_to_address, AddressError};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, sha256, sha256d};
pub use hex::{bytes_to_hex, hash256_to_hex, hex_to_bytes};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut};
