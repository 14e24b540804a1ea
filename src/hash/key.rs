// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hashing and key comparison for trie keys.
//!
//! A [`GenericHamt`][crate::hamt::GenericHamt] never calls [`Hash`] or
//! [`Eq`] itself. It asks a [`KeyHasher`] for both, and both are allowed
//! to fail: the failure is handed back to the caller of the map
//! operation, and the map it was called on stays exactly as it was.

use std::collections::hash_map::RandomState;
use std::convert::Infallible;
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// A uint of the trie's hash width.
pub type HashBits = u32;

/// Fold a 64 bit hash into [`HashBits`].
#[inline]
pub fn fold_hash(hash: u64) -> HashBits {
    (hash ^ (hash >> 32)) as HashBits
}

/// Computes hashes for, and compares, the keys of a map.
///
/// Implementations must be consistent: keys that compare equal must
/// hash to the same value.
pub trait KeyHasher<K: ?Sized> {
    /// The error produced when a key can't be hashed or compared.
    type Error;

    /// Hash a key.
    fn hash_key(&self, key: &K) -> Result<HashBits, Self::Error>;

    /// Test two keys for equality.
    fn key_eq(&self, a: &K, b: &K) -> Result<bool, Self::Error>;
}

/// The [`KeyHasher`] for ordinary [`Hash`] + [`Eq`] keys, built on a
/// [`BuildHasher`]. It never fails.
#[derive(Clone, Default)]
pub struct StdHasher<S = RandomState> {
    build: S,
}

impl<S> StdHasher<S> {
    /// Wrap a [`BuildHasher`].
    pub fn new(build: S) -> Self {
        StdHasher { build }
    }

    /// Get a reference to the wrapped [`BuildHasher`].
    pub fn build_hasher(&self) -> &S {
        &self.build
    }
}

impl<K, S> KeyHasher<K> for StdHasher<S>
where
    K: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Error = Infallible;

    #[inline]
    fn hash_key(&self, key: &K) -> Result<HashBits, Infallible> {
        Ok(fold_hash(self.build.hash_one(key)))
    }

    #[inline]
    fn key_eq(&self, a: &K, b: &K) -> Result<bool, Infallible> {
        Ok(a == b)
    }
}

impl<S> fmt::Debug for StdHasher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StdHasher")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::hash::BuildHasherDefault;

    use crate::test::LolHasher;

    #[test]
    fn fold_keeps_both_halves() {
        assert_eq!(0, fold_hash(0));
        assert_eq!(1, fold_hash(1));
        assert_eq!(1, fold_hash(1 << 32));
        assert_eq!(0, fold_hash((1 << 32) | 1));
    }

    #[test]
    fn std_hasher_is_consistent() {
        let hasher = StdHasher::new(BuildHasherDefault::<LolHasher>::default());
        let a = hasher.hash_key(&1234_i32).unwrap();
        let b = hasher.hash_key(&1234_i32).unwrap();
        assert_eq!(a, b);
        assert!(hasher.key_eq("foo", "foo").unwrap());
        assert!(!hasher.key_eq("foo", "bar").unwrap());
    }
}
