// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/// The level size of HAMTs, in bits
/// Branching factor is 2 ^ HashLevelSize.
// The small value gives deep tries and collision nodes with tiny inputs,
// which is what the tests want.
#[cfg(feature = "small-chunks")]
pub(crate) const HASH_LEVEL_SIZE: usize = 2;
#[cfg(not(feature = "small-chunks"))]
pub(crate) const HASH_LEVEL_SIZE: usize = 5;

/// Width of the hashes stored in the trie, in bits.
pub(crate) const HASH_BITS: usize = 32;

/// A bitmap node holding more than this many entries is promoted to an
/// array node.
pub(crate) const ARRAY_NODE_THRESHOLD: usize = (1 << HASH_LEVEL_SIZE) / 2;

/// Number of bitmap/array levels before the hash is exhausted.
pub(crate) const MAX_DEPTH: usize = HASH_BITS.div_ceil(HASH_LEVEL_SIZE);

/// Maximum number of context watchers registered at once.
pub(crate) const MAX_WATCHERS: usize = 8;
