use flsd_consensus::constants::MAX_STAKE_SPLIT_OUTPUTS;
use flsd_consensus::money::Amount;
use flsd_consensus::ConsensusParams;
use flsd_log::{log_debug, Category};
use flsd_primitives::outpoint::OutPoint;
use flsd_primitives::transaction::{TxIn, TxOut};
use flsd_script::standard::{classify_script_pubkey, ScriptType};
use flsd_storage::KeyValueStore;

use super::StakeError;
use crate::coins::{Coin, MEMPOOL_HEIGHT};
use crate::index::{BlockIndexEntry, ChainIndex};
use crate::uniqueness::Fingerprint;

/// An unspent output offered as stake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransparentStake {
    pub outpoint: OutPoint,
    pub coin: Coin,
}

impl TransparentStake {
    pub fn new(outpoint: OutPoint, coin: Coin) -> Self {
        Self { outpoint, coin }
    }

    pub fn value(&self) -> Amount {
        self.coin.value()
    }

    pub fn uniqueness(&self) -> Fingerprint {
        Fingerprint::transparent(&self.outpoint)
    }

    pub(super) fn index_from<S: KeyValueStore>(
        &self,
        chain: &ChainIndex<S>,
    ) -> Result<Option<BlockIndexEntry>, StakeError> {
        if self.coin.height == MEMPOOL_HEIGHT {
            return Ok(None);
        }
        let Ok(height) = i32::try_from(self.coin.height) else {
            return Ok(None);
        };
        Ok(chain.entry_at_height(height)?)
    }

    pub(super) fn context_check<S: KeyValueStore>(
        &self,
        height: i32,
        time: u32,
        chain: &ChainIndex<S>,
        params: &ConsensusParams,
    ) -> Result<bool, StakeError> {
        let Some(origin) = self.index_from(chain)? else {
            log_debug!(cat: Category::Staking, "stake input {} has no origin block", self.outpoint);
            return Ok(false);
        };
        let mature = params.has_stake_min_age_or_depth(height, time, origin.height, origin.time);
        if !mature {
            log_debug!(
                cat: Category::Staking,
                "stake input {} from height {} is not mature at height {height}",
                self.outpoint,
                origin.height
            );
        }
        Ok(mature)
    }

    pub(super) fn create_tx_in(&self) -> TxIn {
        TxIn::new(self.outpoint.clone())
    }

    /// Coinstake outputs paying `total` back to the kernel script, split into
    /// roughly `split_threshold`-sized pieces.
    pub(super) fn create_tx_outs(
        &self,
        total: Amount,
        split_threshold: Amount,
    ) -> Result<Vec<TxOut>, StakeError> {
        let script = &self.coin.out.script_pubkey;
        match classify_script_pubkey(script) {
            ScriptType::P2Pk | ScriptType::P2Pkh => {}
            _ => return Err(StakeError::UnsupportedScript),
        }

        let mut count = 1usize;
        if split_threshold > 0 {
            let pieces = total / split_threshold;
            if pieces > 1 {
                count = usize::try_from(pieces)
                    .unwrap_or(MAX_STAKE_SPLIT_OUTPUTS)
                    .min(MAX_STAKE_SPLIT_OUTPUTS);
            }
        }
        let share = total / count as Amount;
        let mut outs = vec![TxOut::new(share, script.clone()); count];
        if let Some(last) = outs.last_mut() {
            last.value += total - share * count as Amount;
        }
        Ok(outs)
    }

    pub(super) fn tx_out_from(&self) -> TxOut {
        self.coin.out.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake::StakeInput;
    use flsd_consensus::money::COIN;
    use flsd_script::standard::p2pkh_script;

    fn stake(script: Vec<u8>) -> StakeInput {
        StakeInput::Transparent(TransparentStake::new(
            OutPoint::new([4u8; 32], 2),
            Coin::new(TxOut::new(1_000 * COIN, script), 10, false, false),
        ))
    }

    #[test]
    fn outputs_split_and_sum_to_total() {
        let script = p2pkh_script(&[0x11; 20]);
        let input = stake(script.clone());
        let total = 1_000 * COIN + 7;

        let outs = input.create_tx_outs(total, 300 * COIN).expect("outs");
        assert_eq!(outs.len(), 3);
        assert!(outs.iter().all(|out| out.script_pubkey == script));
        assert_eq!(outs.iter().map(|out| out.value).sum::<Amount>(), total);

        let single = input.create_tx_outs(total, 0).expect("outs");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].value, total);

        let capped = input.create_tx_outs(total, 1).expect("outs");
        assert_eq!(capped.len(), MAX_STAKE_SPLIT_OUTPUTS);
        assert_eq!(capped.iter().map(|out| out.value).sum::<Amount>(), total);
    }

    #[test]
    fn only_key_scripts_can_stake() {
        let mut p2sh = vec![0xa9, 0x14];
        p2sh.extend_from_slice(&[0x22; 20]);
        p2sh.push(0x87);
        assert!(matches!(
            stake(p2sh).create_tx_outs(COIN, 0),
            Err(StakeError::UnsupportedScript)
        ));
    }

    #[test]
    fn tx_in_and_out_come_from_the_coin() {
        let input = stake(p2pkh_script(&[0x33; 20]));
        let txin = input.create_tx_in().expect("txin");
        assert_eq!(txin.prevout, OutPoint::new([4u8; 32], 2));
        assert!(txin.script_sig.is_empty());
        assert_eq!(txin.sequence, u32::MAX);
        assert_eq!(input.tx_out_from().expect("out").value, 1_000 * COIN);
    }
}
