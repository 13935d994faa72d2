use flsd_consensus::money::Amount;
use flsd_consensus::upgrades::UpgradeIndex;
use flsd_consensus::{ConsensusParams, Denomination, Hash256};
use flsd_log::{log_debug, Category};
use flsd_primitives::encoding::{DecodeError, Decoder, Encoder};
use flsd_primitives::hash::sha256d;
use flsd_primitives::transaction::OP_ZEROCOINSPEND;
use flsd_storage::KeyValueStore;

use super::StakeError;
use crate::index::{parse_acc_checksum, BlockIndexEntry, ChainIndex};
use crate::uniqueness::Fingerprint;

/// A legacy zerocoin spend used as stake. The spend proof itself was checked
/// when the spend was accepted; here only the accumulator checksum, the
/// denomination and the serial hash matter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LegacyZerocoinStake {
    pub denomination: Denomination,
    pub checksum: u32,
    pub serial_hash: Hash256,
}

impl LegacyZerocoinStake {
    /// Parses a spend script: opcode, `u32` denomination, `u32` accumulator
    /// checksum, length-prefixed serial.
    pub fn from_spend_script(script_sig: &[u8]) -> Result<Self, StakeError> {
        let Some((_, record)) = script_sig.split_first() else {
            return Err(StakeError::MalformedSpend(DecodeError::UnexpectedEof));
        };
        let mut decoder = Decoder::new(record);
        let raw_denomination = decoder.read_u32_le()?;
        let checksum = decoder.read_u32_le()?;
        let serial = decoder.read_var_bytes()?;
        let denomination = Denomination::from_value(raw_denomination)
            .ok_or(StakeError::InvalidDenomination(raw_denomination))?;
        Ok(Self {
            denomination,
            checksum,
            serial_hash: sha256d(&serial),
        })
    }

    pub fn value(&self) -> Amount {
        self.denomination.amount()
    }

    pub fn uniqueness(&self) -> Fingerprint {
        Fingerprint::legacy(&self.serial_hash, self.denomination)
    }

    /// First block on the active chain whose checkpoint carries this stake's
    /// checksum for its denomination.
    pub(super) fn index_from<S: KeyValueStore>(
        &self,
        chain: &ChainIndex<S>,
        params: &ConsensusParams,
    ) -> Result<Option<BlockIndexEntry>, StakeError> {
        for height in params.zc_scan_start_height()..=params.height_last_zc_accum_checkpoint {
            let Some(entry) = chain.entry_at_height(height)? else {
                break;
            };
            if parse_acc_checksum(entry.acc_checkpoint(), self.denomination) == self.checksum {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub(super) fn context_check<S: KeyValueStore>(
        &self,
        height: i32,
        chain: &ChainIndex<S>,
        params: &ConsensusParams,
    ) -> Result<bool, StakeError> {
        if !params.network_upgrade_active(height, UpgradeIndex::ZerocoinV2)
            || height >= params.height_last_zc_accum_checkpoint
        {
            log_debug!(cat: Category::Staking, "legacy zerocoin stake not allowed at height {height}");
            return Ok(false);
        }
        let checkpoint_height = height - 1 - params.zc_min_stake_depth;
        let Some(entry) = chain.entry_at_height(checkpoint_height)? else {
            return Ok(false);
        };
        let matches = parse_acc_checksum(entry.acc_checkpoint(), self.denomination) == self.checksum;
        if !matches {
            log_debug!(
                cat: Category::Staking,
                "legacy zerocoin stake checksum {:08x} not in checkpoint at height {checkpoint_height}",
                self.checksum
            );
        }
        Ok(matches)
    }
}

/// Script of a private zerocoin spend carrying the given record.
pub fn zerocoin_spend_script(denomination: Denomination, checksum: u32, serial: &[u8]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_u8(OP_ZEROCOINSPEND);
    encoder.write_u32_le(denomination.value());
    encoder.write_u32_le(checksum);
    encoder.write_var_bytes(serial);
    encoder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake::StakeInput;
    use crate::view::EmptyCoinView;
    use flsd_consensus::money::COIN;
    use flsd_primitives::outpoint::OutPoint;
    use flsd_primitives::transaction::TxIn;

    fn legacy_input(denomination: Denomination) -> StakeInput {
        let mut txin = TxIn::new(OutPoint::null());
        txin.script_sig = zerocoin_spend_script(denomination, 0xdead_beef, b"serial");
        StakeInput::from_tx_in(&txin, &EmptyCoinView)
            .expect("parse")
            .expect("legacy input")
    }

    #[test]
    fn spend_record_parses_into_a_legacy_stake() {
        let input = legacy_input(Denomination::OneHundred);
        let StakeInput::LegacyShielded(stake) = &input else {
            panic!("expected legacy stake");
        };
        assert_eq!(stake.checksum, 0xdead_beef);
        assert_eq!(stake.serial_hash, sha256d(b"serial"));
        assert_eq!(input.value(), 100 * COIN);
        assert!(input.is_legacy());
    }

    #[test]
    fn creation_is_always_disabled() {
        for denomination in Denomination::ALL {
            let input = legacy_input(denomination);
            assert!(matches!(input.create_tx_in(), Err(StakeError::Disabled)));
            assert!(matches!(
                input.create_tx_outs(denomination.amount(), 0),
                Err(StakeError::Disabled)
            ));
            assert!(matches!(input.create_tx_outs(0, 1), Err(StakeError::Disabled)));
            assert!(matches!(input.tx_out_from(), Err(StakeError::Disabled)));
        }
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(matches!(
            LegacyZerocoinStake::from_spend_script(&[OP_ZEROCOINSPEND, 1, 0]),
            Err(StakeError::MalformedSpend(_))
        ));
        let mut script = zerocoin_spend_script(Denomination::One, 1, b"s");
        script[1] = 7;
        assert!(matches!(
            LegacyZerocoinStake::from_spend_script(&script),
            Err(StakeError::InvalidDenomination(7))
        ));
    }
}
