//! Consensus-wide constants shared across validation.

/// The maximum size of a standard (relayable) transaction, in bytes.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Stake outputs are never split into more outputs than fit in ~10% of a standard transaction.
pub const MAX_STAKE_SPLIT_OUTPUTS: usize = MAX_STANDARD_TX_SIZE >> 11;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
