//! Stake inputs: the value a proof-of-stake block claims to have staked.
//!
//! Two kinds exist, fixed by protocol history: a transparent unspent output,
//! and a legacy zerocoin spend that can still be validated but never created.

mod legacy;
mod transparent;

use std::fmt;

use flsd_consensus::money::{money_range, Amount};
use flsd_consensus::ConsensusParams;
use flsd_primitives::encoding::DecodeError;
use flsd_primitives::transaction::{TxIn, TxOut};
use flsd_storage::{KeyValueStore, StoreError};

use crate::index::{BlockIndexEntry, ChainIndex};
use crate::uniqueness::Fingerprint;
use crate::view::CoinView;

pub use legacy::{zerocoin_spend_script, LegacyZerocoinStake};
pub use transparent::TransparentStake;

#[derive(Debug)]
pub enum StakeError {
    Store(StoreError),
    MalformedSpend(DecodeError),
    InvalidDenomination(u32),
    /// The operation is permanently unavailable for this kind of input.
    Disabled,
    UnsupportedScript,
    ContextCheckFailed,
    InvalidValue(Amount),
    OriginNotFound,
}

impl fmt::Display for StakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakeError::Store(err) => write!(f, "{err}"),
            StakeError::MalformedSpend(err) => write!(f, "malformed zerocoin spend: {err}"),
            StakeError::InvalidDenomination(value) => {
                write!(f, "invalid zerocoin denomination {value}")
            }
            StakeError::Disabled => write!(f, "legacy zerocoin staking is disabled"),
            StakeError::UnsupportedScript => write!(f, "unsupported stake script"),
            StakeError::ContextCheckFailed => write!(f, "stake input failed context checks"),
            StakeError::InvalidValue(value) => write!(f, "invalid stake value {value}"),
            StakeError::OriginNotFound => write!(f, "stake input origin block not found"),
        }
    }
}

impl std::error::Error for StakeError {}

impl From<StoreError> for StakeError {
    fn from(err: StoreError) -> Self {
        StakeError::Store(err)
    }
}

impl From<DecodeError> for StakeError {
    fn from(err: DecodeError) -> Self {
        StakeError::MalformedSpend(err)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StakeInput {
    Transparent(TransparentStake),
    LegacyShielded(LegacyZerocoinStake),
}

impl StakeInput {
    /// Builds the stake input carried by `txin`. A zerocoin spend is parsed
    /// from its script; anything else is resolved through `coins`, and an
    /// output that is not there yields `Ok(None)`.
    pub fn from_tx_in<V: CoinView + ?Sized>(
        txin: &TxIn,
        coins: &V,
    ) -> Result<Option<Self>, StakeError> {
        if txin.is_zerocoin_spend() {
            return LegacyZerocoinStake::from_spend_script(&txin.script_sig)
                .map(|stake| Some(StakeInput::LegacyShielded(stake)));
        }
        Ok(coins
            .coin(&txin.prevout)?
            .map(|coin| StakeInput::Transparent(TransparentStake::new(txin.prevout.clone(), coin))))
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StakeInput::LegacyShielded(_))
    }

    pub fn value(&self) -> Amount {
        match self {
            StakeInput::Transparent(stake) => stake.value(),
            StakeInput::LegacyShielded(stake) => stake.value(),
        }
    }

    pub fn uniqueness(&self) -> Fingerprint {
        match self {
            StakeInput::Transparent(stake) => stake.uniqueness(),
            StakeInput::LegacyShielded(stake) => stake.uniqueness(),
        }
    }

    /// Block the staked value originates from. `None` means the input cannot
    /// currently be resolved on the active chain.
    pub fn index_from<S: KeyValueStore>(
        &self,
        chain: &ChainIndex<S>,
        params: &ConsensusParams,
    ) -> Result<Option<BlockIndexEntry>, StakeError> {
        match self {
            StakeInput::Transparent(stake) => stake.index_from(chain),
            StakeInput::LegacyShielded(stake) => stake.index_from(chain, params),
        }
    }

    pub fn context_check<S: KeyValueStore>(
        &self,
        height: i32,
        time: u32,
        chain: &ChainIndex<S>,
        params: &ConsensusParams,
    ) -> Result<bool, StakeError> {
        match self {
            StakeInput::Transparent(stake) => stake.context_check(height, time, chain, params),
            StakeInput::LegacyShielded(stake) => stake.context_check(height, chain, params),
        }
    }

    pub fn create_tx_in(&self) -> Result<TxIn, StakeError> {
        match self {
            StakeInput::Transparent(stake) => Ok(stake.create_tx_in()),
            StakeInput::LegacyShielded(_) => Err(StakeError::Disabled),
        }
    }

    pub fn create_tx_outs(
        &self,
        total: Amount,
        split_threshold: Amount,
    ) -> Result<Vec<TxOut>, StakeError> {
        match self {
            StakeInput::Transparent(stake) => stake.create_tx_outs(total, split_threshold),
            StakeInput::LegacyShielded(_) => Err(StakeError::Disabled),
        }
    }

    pub fn tx_out_from(&self) -> Result<TxOut, StakeError> {
        match self {
            StakeInput::Transparent(stake) => Ok(stake.tx_out_from()),
            StakeInput::LegacyShielded(_) => Err(StakeError::Disabled),
        }
    }
}

/// Result of a successful [`validate_stake`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidatedStake {
    pub value: Amount,
    pub fingerprint: Fingerprint,
    pub origin: BlockIndexEntry,
}

/// Runs the checks a staked block needs, in order, stopping at the first
/// failure. Whether the fingerprint is already used is left to the caller.
pub fn validate_stake<S: KeyValueStore>(
    input: &StakeInput,
    height: i32,
    time: u32,
    chain: &ChainIndex<S>,
    params: &ConsensusParams,
) -> Result<ValidatedStake, StakeError> {
    if !input.context_check(height, time, chain, params)? {
        return Err(StakeError::ContextCheckFailed);
    }
    let value = input.value();
    if value <= 0 || !money_range(value) {
        return Err(StakeError::InvalidValue(value));
    }
    let fingerprint = input.uniqueness();
    let origin = input
        .index_from(chain, params)?
        .ok_or(StakeError::OriginNotFound)?;
    Ok(ValidatedStake {
        value,
        fingerprint,
        origin,
    })
}
