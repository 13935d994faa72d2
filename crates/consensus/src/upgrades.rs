//! Network upgrade schedule.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum UpgradeIndex {
    BaseNetwork = 0,
    TestDummy = 1,
    Pos = 2,
    PosV2 = 3,
    Zerocoin = 4,
    ZerocoinV2 = 5,
    ZerocoinPublic = 6,
    StakeModifierV2 = 7,
    V4 = 8,
}

pub const MAX_NETWORK_UPGRADES: usize = 9;

pub const ALL_UPGRADES: [UpgradeIndex; MAX_NETWORK_UPGRADES] = [
    UpgradeIndex::BaseNetwork,
    UpgradeIndex::TestDummy,
    UpgradeIndex::Pos,
    UpgradeIndex::PosV2,
    UpgradeIndex::Zerocoin,
    UpgradeIndex::ZerocoinV2,
    UpgradeIndex::ZerocoinPublic,
    UpgradeIndex::StakeModifierV2,
    UpgradeIndex::V4,
];

impl UpgradeIndex {
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        NETWORK_UPGRADE_NAMES[self.as_usize()]
    }
}

pub type Hash256 = [u8; 32];

#[derive(Clone, Copy, Debug)]
pub struct NetworkUpgrade {
    pub protocol_version: i32,
    pub activation_height: i32,
}

impl NetworkUpgrade {
    pub const ALWAYS_ACTIVE: i32 = 0;
    pub const NO_ACTIVATION_HEIGHT: i32 = -1;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpgradeState {
    Disabled,
    Pending,
    Active,
}

const NETWORK_UPGRADE_NAMES: [&str; MAX_NETWORK_UPGRADES] = [
    "Base",
    "Test dummy",
    "PoS",
    "PoS v2",
    "Zerocoin",
    "Zerocoin v2",
    "Zerocoin public spends",
    "Stake modifier v2",
    "v4.0",
];

pub fn network_upgrade_state(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> UpgradeState {
    let activation_height = upgrades[idx.as_usize()].activation_height;
    if activation_height == NetworkUpgrade::NO_ACTIVATION_HEIGHT {
        UpgradeState::Disabled
    } else if height >= activation_height {
        UpgradeState::Active
    } else {
        UpgradeState::Pending
    }
}

pub fn network_upgrade_active(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
    idx: UpgradeIndex,
) -> bool {
    network_upgrade_state(height, upgrades, idx) == UpgradeState::Active
}

pub fn current_epoch(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
) -> UpgradeIndex {
    for idx in ALL_UPGRADES.iter().rev() {
        if network_upgrade_active(height, upgrades, *idx) {
            return *idx;
        }
    }
    UpgradeIndex::BaseNetwork
}

pub fn next_activation_height(
    height: i32,
    upgrades: &[NetworkUpgrade; MAX_NETWORK_UPGRADES],
) -> Option<i32> {
    if height < 0 {
        return None;
    }
    ALL_UPGRADES
        .iter()
        .skip(1)
        .find(|idx| network_upgrade_state(height, upgrades, **idx) == UpgradeState::Pending)
        .map(|idx| upgrades[idx.as_usize()].activation_height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{consensus_params, Network};

    #[test]
    fn mainnet_zerocoin_window() {
        let params = consensus_params(Network::Mainnet);

        assert!(!network_upgrade_active(
            params.upgrades[UpgradeIndex::ZerocoinV2.as_usize()].activation_height - 1,
            &params.upgrades,
            UpgradeIndex::ZerocoinV2
        ));
        assert!(network_upgrade_active(
            params.upgrades[UpgradeIndex::ZerocoinV2.as_usize()].activation_height,
            &params.upgrades,
            UpgradeIndex::ZerocoinV2
        ));
    }

    #[test]
    fn disabled_upgrades_never_activate() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(
            network_upgrade_state(i32::MAX, &params.upgrades, UpgradeIndex::TestDummy),
            UpgradeState::Disabled
        );
    }

    #[test]
    fn epoch_tracking() {
        let params = consensus_params(Network::Regtest);
        assert_eq!(
            current_epoch(0, &params.upgrades),
            UpgradeIndex::StakeModifierV2
        );
        assert_eq!(
            network_upgrade_state(0, &params.upgrades, UpgradeIndex::ZerocoinPublic),
            UpgradeState::Pending
        );
        assert_eq!(
            next_activation_height(0, &params.upgrades),
            Some(params.upgrades[UpgradeIndex::ZerocoinPublic.as_usize()].activation_height)
        );
    }
}
