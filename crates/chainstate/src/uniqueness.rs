//! Stake fingerprints and the index that prevents reusing them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flsd_consensus::{Denomination, Hash256};
use flsd_primitives::encoding::encode;
use flsd_primitives::hash::{sha256d, sha256d_parts};
use flsd_primitives::hex::bytes_to_hex;
use flsd_primitives::outpoint::OutPoint;
use flsd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const FINGERPRINT_LEN: usize = 33;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FingerprintKind {
    Transparent = 0x00,
    LegacyShielded = 0x01,
}

/// Kind byte followed by a double-SHA256 digest. The kind byte keeps the
/// transparent and legacy spaces disjoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn transparent(outpoint: &OutPoint) -> Self {
        Self::with_kind(FingerprintKind::Transparent, sha256d(&encode(outpoint)))
    }

    /// Derived from the serial hash only, so the mint that produced the coin
    /// cannot be recovered from it.
    pub fn legacy(serial_hash: &Hash256, denomination: Denomination) -> Self {
        let denom = denomination.value().to_le_bytes();
        let digest = sha256d_parts(&[serial_hash.as_slice(), denom.as_slice()]);
        Self::with_kind(FingerprintKind::LegacyShielded, digest)
    }

    fn with_kind(kind: FingerprintKind, digest: Hash256) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes[0] = kind as u8;
        bytes[1..].copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        match bytes[0] {
            0x00 | 0x01 => Some(Self(bytes)),
            _ => None,
        }
    }

    pub fn kind(&self) -> FingerprintKind {
        if self.0[0] == FingerprintKind::LegacyShielded as u8 {
            FingerprintKind::LegacyShielded
        } else {
            FingerprintKind::Transparent
        }
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bytes_to_hex(&self.0))
    }
}

#[derive(Debug)]
pub enum UniquenessError {
    Store(StoreError),
    DoubleStake {
        fingerprint: Fingerprint,
        recorded_at: u32,
    },
    NotRecorded(Fingerprint),
    HeightMismatch {
        fingerprint: Fingerprint,
        recorded_at: u32,
        requested: u32,
    },
}

impl fmt::Display for UniquenessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniquenessError::Store(err) => write!(f, "{err}"),
            UniquenessError::DoubleStake {
                fingerprint,
                recorded_at,
            } => write!(
                f,
                "stake input {fingerprint} already used at height {recorded_at}"
            ),
            UniquenessError::NotRecorded(fingerprint) => {
                write!(f, "stake input {fingerprint} is not recorded")
            }
            UniquenessError::HeightMismatch {
                fingerprint,
                recorded_at,
                requested,
            } => write!(
                f,
                "stake input {fingerprint} recorded at height {recorded_at}, not {requested}"
            ),
        }
    }
}

impl std::error::Error for UniquenessError {}

impl From<StoreError> for UniquenessError {
    fn from(err: StoreError) -> Self {
        UniquenessError::Store(err)
    }
}

/// Fingerprint -> height of the block that used it. Changes are staged in
/// memory until [`stage`](Self::stage) moves them into a write batch.
pub struct UniquenessIndex<S> {
    store: Arc<S>,
    pending: HashMap<Fingerprint, Option<u32>>,
}

impl<S: KeyValueStore> UniquenessIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            pending: HashMap::new(),
        }
    }

    pub fn height_of(&self, fingerprint: &Fingerprint) -> Result<Option<u32>, StoreError> {
        if let Some(staged) = self.pending.get(fingerprint) {
            return Ok(*staged);
        }
        match self.store.get(Column::StakeSerial, fingerprint.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Backend(format!("invalid height for stake input {fingerprint}"))
                })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        Ok(self.height_of(fingerprint)?.is_some())
    }

    pub fn insert(&mut self, fingerprint: Fingerprint, height: u32) -> Result<(), UniquenessError> {
        if let Some(recorded_at) = self.height_of(&fingerprint)? {
            return Err(UniquenessError::DoubleStake {
                fingerprint,
                recorded_at,
            });
        }
        self.pending.insert(fingerprint, Some(height));
        Ok(())
    }

    /// Removes `fingerprint` only if it was recorded by the block at `height`.
    pub fn remove(&mut self, fingerprint: &Fingerprint, height: u32) -> Result<(), UniquenessError> {
        match self.height_of(fingerprint)? {
            None => Err(UniquenessError::NotRecorded(*fingerprint)),
            Some(recorded_at) if recorded_at != height => Err(UniquenessError::HeightMismatch {
                fingerprint: *fingerprint,
                recorded_at,
                requested: height,
            }),
            Some(_) => {
                self.pending.insert(*fingerprint, None);
                Ok(())
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Moves staged changes into `batch`.
    pub fn stage(&mut self, batch: &mut WriteBatch) {
        for (fingerprint, height) in self.pending.drain() {
            match height {
                Some(height) => {
                    batch.put(Column::StakeSerial, fingerprint.as_bytes(), height.to_le_bytes())
                }
                None => batch.delete(Column::StakeSerial, fingerprint.as_bytes()),
            }
        }
    }

    pub fn discard(&mut self) {
        self.pending.clear();
    }
}
