//! Ledger state engine: layered coin views, stake inputs and the indexes
//! that keep stakes unique.

pub mod coins;
pub mod db;
pub mod index;
pub mod ledger;
pub mod lookup;
pub mod mempool_view;
pub mod stake;
pub mod undo;
pub mod uniqueness;
pub mod view;

pub use coins::{Coin, MEMPOOL_HEIGHT};
pub use db::CoinsDb;
pub use ledger::{Ledger, LedgerError, LedgerState};
pub use lookup::{CoinLookup, MAX_LOOKUP_OUTPOINTS};
pub use mempool_view::{EmptyPool, MempoolCoinsView, PendingPool};
pub use stake::{StakeError, StakeInput, ValidatedStake};
pub use uniqueness::{Fingerprint, UniquenessIndex};
pub use view::{CoinView, CoinViewMut, CoinsError, CoinsViewCache};
