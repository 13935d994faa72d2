//! Consensus parameter definitions.

use crate::upgrades::{
    network_upgrade_active, Hash256, NetworkUpgrade, UpgradeIndex, MAX_NETWORK_UPGRADES,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::Mainnet),
            "test" | "testnet" => Some(Self::Testnet),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "main",
            Self::Testnet => "test",
            Self::Regtest => "regtest",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    pub upgrades: [NetworkUpgrade; MAX_NETWORK_UPGRADES],
    /// Minimum age (seconds) of a stake input before stake modifier v2.
    pub stake_min_age: u32,
    /// Minimum depth (blocks) of a stake input once stake modifier v2 is active.
    pub stake_min_depth: i32,
    /// Depth of the accumulator checkpoint a legacy zerocoin stake must commit to.
    pub zc_min_stake_depth: i32,
    pub height_start_zc_serials_v2: i32,
    /// Last block carrying an accumulator checkpoint; legacy zerocoin stakes are
    /// rejected at and above this height.
    pub height_last_zc_accum_checkpoint: i32,
}

impl ConsensusParams {
    pub fn network_upgrade_active(&self, height: i32, idx: UpgradeIndex) -> bool {
        network_upgrade_active(height, &self.upgrades, idx)
    }

    pub fn activation_height(&self, idx: UpgradeIndex) -> i32 {
        self.upgrades[idx.as_usize()].activation_height
    }

    /// Maturity rule for transparent stake inputs: minimum age before stake
    /// modifier v2, minimum depth afterwards.
    pub fn has_stake_min_age_or_depth(
        &self,
        context_height: i32,
        context_time: u32,
        utxo_from_height: i32,
        utxo_from_time: u32,
    ) -> bool {
        if !self.network_upgrade_active(context_height, UpgradeIndex::StakeModifierV2) {
            return u64::from(utxo_from_time) + u64::from(self.stake_min_age)
                <= u64::from(context_time);
        }
        context_height.saturating_sub(utxo_from_height) >= self.stake_min_depth
    }

    /// First height at which accumulator checkpoints are scanned for legacy stakes.
    pub fn zc_scan_start_height(&self) -> i32 {
        self.height_start_zc_serials_v2
            .max(self.activation_height(UpgradeIndex::ZerocoinV2))
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub consensus: ConsensusParams,
    pub default_rest_port: u16,
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (byte reversed) 256-bit hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }

    if hex.is_empty() || hex.len() > 64 {
        return Err(HexError::InvalidLength);
    }
    if !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(HexError::InvalidHex);
    }

    let mut padded = String::with_capacity(64);
    for _ in 0..(64 - hex.len()) {
        padded.push('0');
    }
    padded.push_str(hex);

    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out = u8::from_str_radix(&padded[start..start + 2], 16)
            .map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();

    Ok(bytes)
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => ChainParams {
            network,
            consensus: mainnet_consensus_params(),
            default_rest_port: 56_741,
        },
        Network::Testnet => ChainParams {
            network,
            consensus: testnet_consensus_params(),
            default_rest_port: 56_751,
        },
        Network::Regtest => ChainParams {
            network,
            consensus: regtest_consensus_params(),
            default_rest_port: 56_761,
        },
    }
}

const fn upgrade(protocol_version: i32, activation_height: i32) -> NetworkUpgrade {
    NetworkUpgrade {
        protocol_version,
        activation_height,
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        upgrades: [
            upgrade(70_910, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_910, NetworkUpgrade::NO_ACTIVATION_HEIGHT),
            upgrade(70_910, 201),
            upgrade(70_911, 1_000),
            upgrade(70_912, 5_000),
            upgrade(70_914, 50_000),
            upgrade(70_916, 250_000),
            upgrade(70_918, 300_000),
            upgrade(70_920, 600_000),
        ],
        stake_min_age: 60 * 60,
        stake_min_depth: 600,
        zc_min_stake_depth: 200,
        height_start_zc_serials_v2: 60_000,
        height_last_zc_accum_checkpoint: 250_000,
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        upgrades: [
            upgrade(70_910, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_910, NetworkUpgrade::NO_ACTIVATION_HEIGHT),
            upgrade(70_910, 201),
            upgrade(70_911, 300),
            upgrade(70_912, 400),
            upgrade(70_914, 500),
            upgrade(70_916, 20_000),
            upgrade(70_918, 25_000),
            upgrade(70_920, 40_000),
        ],
        stake_min_age: 60 * 60,
        stake_min_depth: 100,
        zc_min_stake_depth: 200,
        height_start_zc_serials_v2: 600,
        height_last_zc_accum_checkpoint: 20_000,
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        upgrades: [
            upgrade(70_910, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_910, NetworkUpgrade::NO_ACTIVATION_HEIGHT),
            upgrade(70_910, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_911, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_912, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_914, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_916, 300),
            upgrade(70_918, NetworkUpgrade::ALWAYS_ACTIVE),
            upgrade(70_920, NetworkUpgrade::NO_ACTIVATION_HEIGHT),
        ],
        stake_min_age: 0,
        stake_min_depth: 10,
        zc_min_stake_depth: 10,
        height_start_zc_serials_v2: 0,
        height_last_zc_accum_checkpoint: 300,
    }
}
