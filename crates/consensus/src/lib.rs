//! Consensus constants, parameters, and upgrade schedule.

pub mod constants;
pub mod money;
pub mod params;
pub mod upgrades;
pub mod zerocoin;

pub use params::{chain_params, consensus_params, ChainParams, ConsensusParams, Network};
pub use upgrades::Hash256;
pub use zerocoin::Denomination;
