// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A persistent map.
//!
//! An immutable map using [hash array mapped tries][1], with
//! structural sharing between versions: [`assoc`][GenericHamt::assoc]
//! and [`without`][GenericHamt::without] copy only the path to the slot
//! they touch, and the map they were called on stays valid and
//! unchanged.
//!
//! Hashing and key comparison go through a [`KeyHasher`], which may
//! fail. A failure aborts the operation and is returned to the caller.
//!
//! [1]: https://en.wikipedia.org/wiki/Hash_array_mapped_trie

use std::collections;
use std::convert::Infallible;
use std::fmt::{Debug, Error, Formatter};
use std::iter::{FromIterator, FusedIterator};
use std::ops::ControlFlow;

use archery::{SharedPointer, SharedPointerKind};

use crate::hash::key::{KeyHasher, StdHasher};
use crate::nodes::hamt::{Node, NodeIter, Removed};
use crate::shared_ptr::DefaultSharedPtr;
use crate::util::into_ok;

/// Construct a map from a sequence of key/value pairs.
///
/// # Examples
///
/// ```
/// # #[macro_use] extern crate ctxvars;
/// # use ctxvars::Hamt;
/// # fn main() {
/// assert_eq!(
///   hamt!{
///     1 => 11,
///     2 => 22,
///     3 => 33
///   },
///   Hamt::from(vec![(1, 11), (2, 22), (3, 33)])
/// );
/// # }
/// ```
#[macro_export]
macro_rules! hamt {
    () => { $crate::hamt::Hamt::new() };

    ( $( $key:expr => $value:expr ),* ) => {{
        let mut map = $crate::hamt::Hamt::new();
        $({
            map.insert($key, $value);
        })*;
        map
    }};

    ( $( $key:expr => $value:expr ,)* ) => {{
        let mut map = $crate::hamt::Hamt::new();
        $({
            map.insert($key, $value);
        })*;
        map
    }};
}

/// Type alias for [`GenericHamt`] that hashes with [`StdHasher`] over
/// [`RandomState`][std::collections::hash_map::RandomState] and uses
/// [`DefaultSharedPtr`] as the pointer type.
///
/// [DefaultSharedPtr]: ../shared_ptr/type.DefaultSharedPtr.html
pub type Hamt<K, V> = GenericHamt<K, V, StdHasher, DefaultSharedPtr>;

/// A persistent hash map.
///
/// Cloning is O(1). Lookups, updates and removals are O(log<sub>32</sub>
/// n), and every update returns a new map that shares all untouched
/// subtrees with the old one.
///
/// Entries come out of the iterators in a deterministic order for a
/// given trie shape, but maps with equal contents built through
/// different histories may iterate in different orders.
pub struct GenericHamt<K, V, S, P: SharedPointerKind> {
    size: usize,
    root: Option<SharedPointer<Node<K, V, P>, P>>,
    hasher: S,
}

impl<K, V, S, P: SharedPointerKind> GenericHamt<K, V, S, P> {
    /// Construct an empty map.
    #[inline]
    #[must_use]
    pub fn new() -> Self
    where
        S: Default,
    {
        Self::default()
    }

    /// Construct an empty map using the provided hasher.
    #[inline]
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        GenericHamt {
            size: 0,
            root: None,
            hasher,
        }
    }

    /// Test whether a map is empty.
    ///
    /// Time: O(1)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of mappings in a map.
    ///
    /// Time: O(1)
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate ctxvars;
    /// assert_eq!(3, hamt!{
    ///   1 => 11,
    ///   2 => 22,
    ///   3 => 33
    /// }.len());
    /// ```
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Test whether two maps refer to the same content in memory.
    ///
    /// This is true if the two sides are references to the same map,
    /// or if the two maps refer to the same root node. A
    /// [`without`][GenericHamt::without] that found nothing to remove
    /// returns a map for which this holds.
    ///
    /// Time: O(1)
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => SharedPointer::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Get a reference to the map's [`KeyHasher`].
    #[must_use]
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Discard all mappings.
    pub fn clear(&mut self) {
        self.root = None;
        self.size = 0;
    }

    /// Get an iterator over the key/value pairs of a map.
    ///
    /// The iterator owns a reference to the trie, so it stays valid
    /// whatever happens to `self` afterwards.
    #[inline]
    #[must_use]
    pub fn iter(&self) -> Iter<K, V, P> {
        Iter {
            it: NodeIter::new(self.root.as_ref(), self.size),
        }
    }

    /// Get an iterator over a map's keys.
    #[inline]
    #[must_use]
    pub fn keys(&self) -> Keys<K, V, P> {
        Keys {
            it: NodeIter::new(self.root.as_ref(), self.size),
        }
    }

    /// Get an iterator over a map's values.
    #[inline]
    #[must_use]
    pub fn values(&self) -> Values<K, V, P> {
        Values {
            it: NodeIter::new(self.root.as_ref(), self.size),
        }
    }

    /// Call `visit` on every key and value in the map.
    ///
    /// This is the hook for a cycle collector tracing through values
    /// stored in the map. It allocates nothing per entry and never
    /// recurses, however deep the trie.
    pub fn trace<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V),
    {
        if let Some(root) = &self.root {
            match root.walk(|key, value| {
                visit(key, value);
                ControlFlow::<Infallible>::Continue(())
            }) {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(never) => match never {},
            }
        }
    }

    /// Panic if the trie breaks one of its structural invariants.
    #[cfg(any(test, feature = "debug"))]
    pub fn assert_invariants(&self) {
        let count = match &self.root {
            Some(root) => root.check(0, false),
            None => 0,
        };
        assert_eq!(self.size, count, "size doesn't match the trie");
    }
}

impl<K, V, S, P> GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K> + Clone,
    P: SharedPointerKind,
{
    /// Look up a key.
    ///
    /// A missing key is `Ok(None)`; an error means hashing or
    /// comparing keys failed.
    ///
    /// Time: O(log n)
    pub fn find(&self, key: &K) -> Result<Option<&V>, S::Error> {
        match &self.root {
            Some(root) => {
                let hash = self.hasher.hash_key(key)?;
                root.find(&self.hasher, hash, key)
            }
            None => Ok(None),
        }
    }

    /// Test for the presence of a key.
    ///
    /// Time: O(log n)
    pub fn contains_key(&self, key: &K) -> Result<bool, S::Error> {
        self.find(key).map(|found| found.is_some())
    }

    /// Construct a new map with `key` bound to `value`.
    ///
    /// If the map already has a mapping for the key, the previous
    /// value is replaced.
    ///
    /// Time: O(log n)
    pub fn assoc(&self, key: K, value: V) -> Result<Self, S::Error> {
        let hash = self.hasher.hash_key(&key)?;
        let (root, added) = match &self.root {
            Some(root) => root.assoc(&self.hasher, 0, hash, key, value)?,
            None => (Node::unit(key, value, hash), true),
        };
        Ok(GenericHamt {
            size: if added { self.size + 1 } else { self.size },
            root: Some(SharedPointer::new(root)),
            hasher: self.hasher.clone(),
        })
    }

    /// Construct a new map without the mapping for `key`.
    ///
    /// If the key isn't there, the result shares its root with `self`
    /// (see [`ptr_eq`][GenericHamt::ptr_eq]).
    ///
    /// Time: O(log n)
    pub fn without(&self, key: &K) -> Result<Self, S::Error> {
        let root = match &self.root {
            Some(root) => root,
            None => return Ok(self.clone()),
        };
        let hash = self.hasher.hash_key(key)?;
        let root = match root.without(&self.hasher, 0, hash, key)? {
            Removed::NotFound => return Ok(self.clone()),
            Removed::Empty => None,
            Removed::Leaf(key, value, hash) => Some(SharedPointer::new(Node::unit(key, value, hash))),
            Removed::Node(node) => Some(SharedPointer::new(node)),
        };
        Ok(GenericHamt {
            size: self.size - 1,
            root,
            hasher: self.hasher.clone(),
        })
    }

    /// Test whether two maps hold the same keys mapped to equal values.
    ///
    /// This compares contents, not trie shapes. Keys of `self` are
    /// looked up in `other` with `other`'s hasher.
    ///
    /// Time: O(n log n)
    pub fn try_eq<S2, P2>(&self, other: &GenericHamt<K, V, S2, P2>) -> Result<bool, S2::Error>
    where
        V: PartialEq,
        S2: KeyHasher<K> + Clone,
        P2: SharedPointerKind,
    {
        if self.len() != other.len() {
            return Ok(false);
        }
        let root = match &self.root {
            Some(root) => root,
            None => return Ok(true),
        };
        let flow = root.walk(|key, value| match other.find(key) {
            Ok(Some(found)) if found == value => ControlFlow::Continue(()),
            Ok(_) => ControlFlow::Break(Ok(false)),
            Err(err) => ControlFlow::Break(Err(err)),
        });
        match flow {
            ControlFlow::Continue(()) => Ok(true),
            ControlFlow::Break(result) => result,
        }
    }
}

impl<K, V, S, P> GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K, Error = Infallible> + Clone,
    P: SharedPointerKind,
{
    /// Construct a map with a single mapping.
    #[must_use]
    pub fn unit(key: K, value: V) -> Self
    where
        S: Default,
    {
        Self::new().update(key, value)
    }

    /// Get the value for a key.
    ///
    /// Time: O(log n)
    ///
    /// # Examples
    ///
    /// ```
    /// # #[macro_use] extern crate ctxvars;
    /// let map = hamt!{123 => "lol"};
    /// assert_eq!(
    ///   map.get(&123),
    ///   Some(&"lol")
    /// );
    /// ```
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        into_ok(self.find(key))
    }

    /// Construct a new map with `key` bound to `value`.
    ///
    /// Time: O(log n)
    #[must_use]
    pub fn update(&self, key: K, value: V) -> Self {
        into_ok(self.assoc(key, value))
    }

    /// Bind `key` to `value` in place, returning the previous value.
    ///
    /// Time: O(log n)
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.get(&key).cloned();
        *self = self.update(key, value);
        previous
    }

    /// Remove a key in place, returning its value.
    ///
    /// Time: O(log n)
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let previous = self.get(key).cloned();
        if previous.is_some() {
            *self = into_ok(self.without(key));
        }
        previous
    }
}

// Core traits

impl<K, V, S, P> Clone for GenericHamt<K, V, S, P>
where
    S: Clone,
    P: SharedPointerKind,
{
    /// Clone a map.
    ///
    /// Time: O(1)
    #[inline]
    fn clone(&self) -> Self {
        GenericHamt {
            size: self.size,
            root: self.root.clone(),
            hasher: self.hasher.clone(),
        }
    }
}

impl<K, V, S1, S2, P1, P2> PartialEq<GenericHamt<K, V, S2, P2>> for GenericHamt<K, V, S1, P1>
where
    K: Clone,
    V: Clone + PartialEq,
    S1: KeyHasher<K> + Clone,
    S2: KeyHasher<K, Error = Infallible> + Clone,
    P1: SharedPointerKind,
    P2: SharedPointerKind,
{
    fn eq(&self, other: &GenericHamt<K, V, S2, P2>) -> bool {
        into_ok(self.try_eq(other))
    }
}

impl<K, V, S, P> Eq for GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone + Eq,
    S: KeyHasher<K, Error = Infallible> + Clone,
    P: SharedPointerKind,
{
}

impl<K, V, S, P> Default for GenericHamt<K, V, S, P>
where
    S: Default,
    P: SharedPointerKind,
{
    #[inline]
    fn default() -> Self {
        GenericHamt {
            size: 0,
            root: None,
            hasher: Default::default(),
        }
    }
}

impl<K, V, S, P> Extend<(K, V)> for GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K, Error = Infallible> + Clone,
    P: SharedPointerKind,
{
    fn extend<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in iter {
            *self = self.update(key, value);
        }
    }
}

impl<K, V, S, P> Debug for GenericHamt<K, V, S, P>
where
    K: Debug,
    V: Debug,
    P: SharedPointerKind,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let mut d = f.debug_map();
        self.trace(|key, value| {
            d.entry(key, value);
        });
        d.finish()
    }
}

// Iterators

/// An iterator over the key/value pairs of a map.
pub struct Iter<K, V, P: SharedPointerKind> {
    it: NodeIter<K, V, P>,
}

// We impl Clone instead of deriving it, because we want Clone even if K and V aren't.
impl<K, V, P: SharedPointerKind> Clone for Iter<K, V, P> {
    fn clone(&self) -> Self {
        Iter {
            it: self.it.clone(),
        }
    }
}

impl<K: Clone, V: Clone, P: SharedPointerKind> Iterator for Iter<K, V, P> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.it
            .next_with(|key, value| (key.clone(), value.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.it.len(), Some(self.it.len()))
    }
}

impl<K: Clone, V: Clone, P: SharedPointerKind> ExactSizeIterator for Iter<K, V, P> {}

impl<K: Clone, V: Clone, P: SharedPointerKind> FusedIterator for Iter<K, V, P> {}

/// An iterator over the keys of a map.
pub struct Keys<K, V, P: SharedPointerKind> {
    it: NodeIter<K, V, P>,
}

impl<K: Clone, V, P: SharedPointerKind> Iterator for Keys<K, V, P> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.it.next_with(|key, _| key.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.it.len(), Some(self.it.len()))
    }
}

impl<K: Clone, V, P: SharedPointerKind> ExactSizeIterator for Keys<K, V, P> {}

impl<K: Clone, V, P: SharedPointerKind> FusedIterator for Keys<K, V, P> {}

/// An iterator over the values of a map.
pub struct Values<K, V, P: SharedPointerKind> {
    it: NodeIter<K, V, P>,
}

impl<K, V: Clone, P: SharedPointerKind> Iterator for Values<K, V, P> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.it.next_with(|_, value| value.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.it.len(), Some(self.it.len()))
    }
}

impl<K, V: Clone, P: SharedPointerKind> ExactSizeIterator for Values<K, V, P> {}

impl<K, V: Clone, P: SharedPointerKind> FusedIterator for Values<K, V, P> {}

impl<K: Clone, V: Clone, S, P: SharedPointerKind> IntoIterator for &GenericHamt<K, V, S, P> {
    type Item = (K, V);
    type IntoIter = Iter<K, V, P>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone, V: Clone, S, P: SharedPointerKind> IntoIterator for GenericHamt<K, V, S, P> {
    type Item = (K, V);
    type IntoIter = Iter<K, V, P>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// Conversions

impl<K, V, S, P> FromIterator<(K, V)> for GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K, Error = Infallible> + Clone + Default,
    P: SharedPointerKind,
{
    fn from_iter<T>(i: T) -> Self
    where
        T: IntoIterator<Item = (K, V)>,
    {
        let mut map = Self::default();
        map.extend(i);
        map
    }
}

impl<K, V, S, P> From<Vec<(K, V)>> for GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K, Error = Infallible> + Clone + Default,
    P: SharedPointerKind,
{
    fn from(m: Vec<(K, V)>) -> Self {
        m.into_iter().collect()
    }
}

impl<K, V, S, P, S2> From<collections::HashMap<K, V, S2>> for GenericHamt<K, V, S, P>
where
    K: Clone,
    V: Clone,
    S: KeyHasher<K, Error = Infallible> + Clone + Default,
    P: SharedPointerKind,
{
    fn from(m: collections::HashMap<K, V, S2>) -> Self {
        m.into_iter().collect()
    }
}

// Tests

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::key::HashBits;
    use crate::test::{ConstHasher, FailingHasher, LolHasher, MaskHasher};
    use ::proptest::strategy::{Just, Strategy};
    use ::proptest::{collection, num::i16, proptest};
    use pretty_assertions::assert_eq;
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::hash::BuildHasherDefault;

    assert_impl_all!(Hamt<i32, i32>: Send, Sync);
    assert_not_impl_any!(Hamt<i32, *const i32>: Send, Sync);
    assert_not_impl_any!(Hamt<*const i32, i32>: Send, Sync);
    assert_covariant!(Hamt<T, i32> in T);
    assert_covariant!(Hamt<i32, T> in T);

    type LolHamt = GenericHamt<i16, i16, StdHasher<BuildHasherDefault<LolHasher>>, DefaultSharedPtr>;

    // Distinct keys in one order, and the same pairs in another.
    fn pairs_and_shuffled() -> impl Strategy<Value = (Vec<(i16, i16)>, Vec<(i16, i16)>)> {
        collection::hash_map(i16::ANY, i16::ANY, 0..1000).prop_flat_map(|m| {
            let pairs: Vec<(i16, i16)> = m.into_iter().collect();
            (Just(pairs.clone()), Just(pairs).prop_shuffle())
        })
    }

    fn const_map(hash: HashBits) -> GenericHamt<i32, i32, ConstHasher, DefaultSharedPtr> {
        GenericHamt::with_hasher(ConstHasher(hash))
    }

    #[test]
    fn persistence() {
        let m1: Hamt<i32, &str> = hamt! {1 => "one", 2 => "two"};
        let m2 = m1.update(3, "three");
        assert_eq!(None, m1.get(&3));
        assert_eq!(Some(&"three"), m2.get(&3));
        assert_eq!(2, m1.len());
        assert_eq!(3, m2.len());
    }

    #[test]
    fn safe_mutation() {
        let v1: Hamt<usize, usize> = (0..131_072).map(|i| (i, i)).collect();
        let v2 = v1.update(131_000, 23);
        assert_eq!(Some(&23), v2.get(&131_000));
        assert_eq!(Some(&131_000), v1.get(&131_000));
        v1.assert_invariants();
        v2.assert_invariants();
    }

    #[test]
    fn last_write_wins() {
        let map: Hamt<&str, i32> = Hamt::new().update("k", 1).update("k", 2);
        assert_eq!(Some(&2), map.get(&"k"));
        assert_eq!(1, map.len());
    }

    #[test]
    fn without_missing_key_shares_root() {
        let map: Hamt<i32, i32> = hamt! {1 => 1, 2 => 2};
        let same = map.without(&3).unwrap();
        assert!(map.ptr_eq(&same));
        assert_eq!(map, same);

        let empty: Hamt<i32, i32> = Hamt::new();
        assert!(empty.without(&1).unwrap().ptr_eq(&empty));
    }

    #[test]
    fn without_last_key_empties_map() {
        let map: Hamt<i32, i32> = Hamt::unit(1, 1);
        let empty = map.without(&1).unwrap();
        assert!(empty.is_empty());
        assert_eq!(None, empty.get(&1));
        assert_eq!(0, empty.iter().count());
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let m1: Hamt<&str, i32> = Hamt::new().update("a", 1).update("b", 2).update("c", 3);
        let m2: Hamt<&str, i32> = Hamt::new().update("c", 3).update("a", 1).update("b", 2);
        assert_eq!(m1, m2);
        assert_ne!(m1, m2.update("c", 4));
        assert_ne!(m1, m2.without(&"c").unwrap());
    }

    #[test]
    fn equality_after_deletions() {
        let full: LolHamt = (0..500).map(|i| (i, i)).collect();
        let mut shrunk = full.clone();
        for i in 100..500 {
            shrunk = shrunk.without(&i).unwrap();
        }
        let fresh: LolHamt = (0..100).map(|i| (i, i)).collect();
        assert_eq!(fresh, shrunk);
        shrunk.assert_invariants();
    }

    #[test]
    fn proper_formatting() {
        let map: Hamt<usize, usize> = hamt![1 => 2];
        assert_eq!("{1: 2}", format!("{:?}", map));

        assert_eq!("{}", format!("{:?}", Hamt::<(), ()>::new()));
    }

    #[test]
    fn macro_allows_trailing_comma() {
        let map1: Hamt<&str, i32> = hamt! {"x" => 1, "y" => 2};
        let map2: Hamt<&str, i32> = hamt! {
            "x" => 1,
            "y" => 2,
        };
        assert_eq!(map1, map2);
    }

    #[test]
    fn full_collisions() {
        let mut map = const_map(0xdead_beef);
        for i in 0..10 {
            map = map.assoc(i, i * 10).unwrap();
        }
        assert_eq!(10, map.len());
        map.assert_invariants();
        for i in 0..10 {
            assert_eq!(Some(&(i * 10)), map.find(&i).unwrap());
        }
        assert_eq!(None, map.find(&10).unwrap());

        let fewer = map.without(&3).unwrap();
        assert_eq!(None, fewer.find(&3).unwrap());
        assert_eq!(Some(&40), fewer.find(&4).unwrap());
        assert_eq!(Some(&30), map.find(&3).unwrap());
        fewer.assert_invariants();
    }

    #[test]
    fn collision_pair_survives_deletion() {
        let map = const_map(7).assoc(1, 1).unwrap().assoc(2, 2).unwrap();
        let left = map.without(&1).unwrap();
        assert_eq!(1, left.len());
        assert_eq!(Some(&2), left.find(&2).unwrap());
        assert_eq!(None, left.find(&1).unwrap());
        left.assert_invariants();
        let gone = left.without(&2).unwrap();
        assert!(gone.is_empty());
    }

    #[test]
    fn remove_top_level_collisions() {
        let pairs = vec![9, 2569, 27145];
        let mut map: LolHamt = Default::default();
        for k in pairs.clone() {
            map.insert(k, k);
        }
        assert_eq!(pairs.len(), map.len());
        let keys: Vec<_> = map.keys().collect();
        for k in keys {
            let l = map.len();
            assert_eq!(Some(&k), map.get(&k));
            map.remove(&k);
            assert_eq!(None, map.get(&k));
            assert_eq!(l - 1, map.len());
            map.assert_invariants();
        }
    }

    #[test]
    fn array_promotion() {
        // Every key differs only in the lowest five bits, so they all
        // land in the root node.
        let mut map: GenericHamt<u32, u32, MaskHasher, DefaultSharedPtr> =
            GenericHamt::with_hasher(MaskHasher(0x1f));
        for i in 0..32 {
            map = map.assoc(i, i).unwrap();
            map.assert_invariants();
        }
        for i in 0..32 {
            assert_eq!(Some(&i), map.find(&i).unwrap());
        }
        for i in 0..31 {
            map = map.without(&i).unwrap();
            map.assert_invariants();
        }
        assert_eq!(1, map.len());
        assert_eq!(Some(&31), map.find(&31).unwrap());
    }

    #[test]
    fn failing_hash_leaves_map_untouched() {
        let hasher = FailingHasher::default();
        let map = GenericHamt::<i32, i32, _, DefaultSharedPtr>::with_hasher(hasher.clone())
            .assoc(1, 1)
            .unwrap()
            .assoc(2, 2)
            .unwrap();
        hasher.fail_hash(true);
        assert!(map.assoc(3, 3).is_err());
        assert!(map.find(&1).is_err());
        assert!(map.without(&1).is_err());
        hasher.fail_hash(false);
        assert_eq!(2, map.len());
        assert_eq!(Some(&1), map.find(&1).unwrap());
        assert_eq!(None, map.find(&3).unwrap());
    }

    #[test]
    fn failing_comparison_propagates() {
        let hasher = FailingHasher::default();
        let map = GenericHamt::<i32, i32, _, DefaultSharedPtr>::with_hasher(hasher.clone())
            .assoc(1, 1)
            .unwrap();
        hasher.fail_eq(true);
        assert!(map.find(&1).is_err());
        assert!(map.assoc(1, 5).is_err());
        assert!(map.without(&1).is_err());
        assert!(map.try_eq(&map).is_err());
        hasher.fail_eq(false);
        assert_eq!(Some(&1), map.find(&1).unwrap());
        assert_eq!(Ok(true), map.try_eq(&map));
    }

    #[test]
    fn trace_visits_everything() {
        let map: LolHamt = (0..1000).map(|i| (i, -i)).collect();
        let mut seen = collections::HashSet::new();
        map.trace(|k, v| {
            assert_eq!(-*k, *v);
            seen.insert(*k);
        });
        assert_eq!(1000, seen.len());
    }

    #[test]
    fn trace_through_collisions() {
        let mut map = const_map(0x8000_0001);
        for i in 0..20 {
            map = map.assoc(i, i * 2).unwrap();
        }
        let mut traced = Vec::new();
        map.trace(|k, v| traced.push((*k, *v)));
        traced.sort_unstable();
        assert_eq!((0..20).map(|i| (i, i * 2)).collect::<Vec<_>>(), traced);
    }

    #[test]
    fn iterator_outlives_map() {
        let map: Hamt<i32, i32> = (0..100).map(|i| (i, i)).collect();
        let it = map.iter();
        drop(map);
        assert_eq!(100, it.count());
    }

    #[test]
    fn iterators_are_fused() {
        let map: Hamt<i32, i32> = hamt! {1 => 2};
        let mut it = map.keys();
        assert_eq!(Some(1), it.next());
        assert_eq!(None, it.next());
        assert_eq!(None, it.next());
    }

    #[test]
    fn large_map() {
        let mut map = Hamt::<_, _>::new();
        let size = 32769;
        for i in 0..size {
            map.insert(i, i);
        }
        assert_eq!(size, map.len());
        for i in 0..size {
            assert_eq!(Some(&i), map.get(&i));
        }
        map.assert_invariants();
    }

    proptest! {
        #[test]
        fn update_and_length(ref m in collection::hash_map(i16::ANY, i16::ANY, 0..1000)) {
            let mut map: LolHamt = Default::default();
            for (index, (k, v)) in m.iter().enumerate() {
                map = map.update(*k, *v);
                assert_eq!(Some(v), map.get(k));
                assert_eq!(index + 1, map.len());
            }
            map.assert_invariants();
        }

        #[test]
        fn iterate_over(ref m in collection::hash_map(i16::ANY, i16::ANY, 0..1000)) {
            let map: LolHamt = m.iter().map(|(k, v)| (*k, *v)).collect();
            let items: collections::HashMap<i16, i16> = map.iter().collect();
            assert_eq!(m.len(), map.iter().count());
            assert_eq!(m, &items);
            let keys: collections::HashSet<i16> = map.keys().collect();
            assert_eq!(m.len(), keys.len());
            assert_eq!(m.len(), map.values().count());
        }

        #[test]
        fn equality((ref pairs, ref shuffled) in pairs_and_shuffled()) {
            let map1: LolHamt = pairs.iter().cloned().collect();
            let map2: LolHamt = shuffled.iter().cloned().collect();
            map2.assert_invariants();
            assert_eq!(map1, map2);
            assert_eq!(Ok(true), map1.try_eq(&map2));
        }

        #[test]
        fn lookup(ref m in collection::hash_map(i16::ANY, i16::ANY, 0..1000)) {
            let map: Hamt<i16, i16> = m.iter().map(|(k, v)| (*k, *v)).collect();
            for (k, v) in m {
                assert_eq!(Some(*v), map.get(k).cloned(), "{k} not found in map {map:?}");
            }
        }

        #[test]
        fn without(ref pairs in collection::vec((i16::ANY, i16::ANY), 0..100)) {
            let mut m: collections::HashMap<i16, i16> = collections::HashMap::new();
            for (k, v) in pairs {
                m.insert(*k, *v);
            }
            let mut map: LolHamt = Default::default();
            for (k, v) in &m {
                map = map.update(*k, *v);
            }
            for k in m.keys() {
                let l = map.len();
                assert_eq!(m.get(k).cloned(), map.get(k).cloned());
                map = map.without(k).unwrap();
                assert_eq!(None, map.get(k));
                assert_eq!(l - 1, map.len());
                map.assert_invariants();
            }
        }

        #[test]
        fn cardinality(ref m in collection::hash_map(i16::ANY, i16::ANY, 0..200), k in i16::ANY, v in i16::ANY) {
            let map: LolHamt = m.iter().map(|(k, v)| (*k, *v)).collect();
            let present = m.contains_key(&k);
            let added = map.update(k, v);
            let removed = map.without(&k).unwrap();
            assert_eq!(if present { map.len() } else { map.len() + 1 }, added.len());
            assert_eq!(if present { map.len() - 1 } else { map.len() }, removed.len());
            assert_eq!(present, removed.len() < map.len());
            assert_eq!(Some(&v), added.get(&k));
            assert_eq!(present, map.get(&k).is_some());
        }

        #[test]
        fn delete_and_reinsert(
            ref input in collection::hash_map(i16::ANY, i16::ANY, 1..1000),
            index_rand in ::proptest::num::usize::ANY
        ) {
            let index = *input.keys().nth(index_rand % input.len()).unwrap();
            let map1: Hamt<_, _> = Hamt::from(input.clone());
            let val = *map1.get(&index).unwrap();
            let map2 = map1.without(&index).unwrap();
            let map3 = map2.update(index, val);
            for key in map2.keys() {
                assert!(key != index);
            }
            assert_eq!(map1.len(), map2.len() + 1);
            assert_eq!(map1, map3);
        }

        #[test]
        fn exact_size_iterator(ref m in collection::hash_map(i16::ANY, i16::ANY, 0..100)) {
            let map: Hamt<i16, i16> = m.iter().map(|(k, v)| (*k, *v)).collect();
            let mut should_be = map.len();
            let mut it = map.iter();
            loop {
                assert_eq!(should_be, it.len());
                match it.next() {
                    None => break,
                    Some(_) => should_be -= 1,
                }
            }
            assert_eq!(0, it.len());
        }
    }
}
