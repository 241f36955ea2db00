//! Blocks, reduced to the parts the mempool and its consumers need.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The height of a block is the length of the chain back to the genesis
/// block.
///
/// Heights are assigned by consensus and strictly increase along a chain.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Height(pub u64);

impl Height {
    /// The height of the genesis block.
    pub const MIN: Height = Height(0);

    /// The number of blocks between `earlier` and `self`, or zero if
    /// `earlier` is not actually earlier.
    pub fn blocks_since(&self, earlier: Height) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Height {
    fn from(height: u64) -> Self {
        Height(height)
    }
}
