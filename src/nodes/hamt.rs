// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt;
use std::ops::ControlFlow;

use archery::{SharedPointer, SharedPointerKind};
use bitmaps::Bitmap;
use imbl_sized_chunks::sparse_chunk::SparseChunk;

use crate::config::{ARRAY_NODE_THRESHOLD, HASH_BITS, MAX_DEPTH};
use crate::hash::key::{HashBits, KeyHasher};

pub(crate) use crate::config::HASH_LEVEL_SIZE as HASH_SHIFT;
pub(crate) const HASH_WIDTH: usize = 2_usize.pow(HASH_SHIFT as u32);
const HASH_MASK: HashBits = (HASH_WIDTH - 1) as HashBits;

/// Frames needed to walk the deepest possible path: one per bitmap or
/// array level, plus the collision node below the last one.
pub(crate) const STACK_SIZE: usize = MAX_DEPTH + 1;

#[inline]
fn mask(hash: HashBits, shift: usize) -> usize {
    (hash >> shift & HASH_MASK) as usize
}

/// True if a node at `shift` is on the last level that still consumes
/// hash bits.
#[inline]
fn is_last_level(shift: usize) -> bool {
    shift + HASH_SHIFT >= HASH_BITS
}

pub(crate) type NodeRef<K, V, P> = SharedPointer<Node<K, V, P>, P>;

pub(crate) enum Node<K, V, P: SharedPointerKind> {
    Bitmap(BitmapNode<K, V, P>),
    Array(ArrayNode<K, V, P>),
    Collision(CollisionNode<K, V>),
}

/// Sparse node: only occupied slots are stored, in slot order.
pub(crate) struct BitmapNode<K, V, P: SharedPointerKind> {
    bitmap: Bitmap<HASH_WIDTH>,
    entries: Vec<Entry<K, V, P>>,
}

pub(crate) enum Entry<K, V, P: SharedPointerKind> {
    Leaf(K, V, HashBits),
    Child(NodeRef<K, V, P>),
}

/// Dense node: every occupied slot holds a child node.
pub(crate) struct ArrayNode<K, V, P: SharedPointerKind> {
    children: SparseChunk<NodeRef<K, V, P>, HASH_WIDTH>,
}

/// Keys whose full hashes are identical.
pub(crate) struct CollisionNode<K, V> {
    hash: HashBits,
    pairs: Vec<(K, V)>,
}

/// Outcome of removing a key from a subtree.
pub(crate) enum Removed<K, V, P: SharedPointerKind> {
    NotFound,
    Empty,
    /// The subtree shrank to a single leaf, which the parent should
    /// store inline.
    Leaf(K, V, HashBits),
    Node(Node<K, V, P>),
}

impl<K: Clone, V: Clone, P: SharedPointerKind> Clone for Entry<K, V, P> {
    fn clone(&self) -> Self {
        match self {
            Entry::Leaf(key, value, hash) => Entry::Leaf(key.clone(), value.clone(), *hash),
            Entry::Child(node) => Entry::Child(node.clone()),
        }
    }
}

impl<K: Clone, V: Clone> Clone for CollisionNode<K, V> {
    fn clone(&self) -> Self {
        CollisionNode {
            hash: self.hash,
            pairs: self.pairs.clone(),
        }
    }
}

impl<K, V, P: SharedPointerKind> BitmapNode<K, V, P> {
    fn unit(index: usize, entry: Entry<K, V, P>) -> Self {
        let mut bitmap = Bitmap::new();
        bitmap.set(index, true);
        BitmapNode {
            bitmap,
            entries: vec![entry],
        }
    }

    fn pair(index1: usize, entry1: Entry<K, V, P>, index2: usize, entry2: Entry<K, V, P>) -> Self {
        let mut bitmap = Bitmap::new();
        bitmap.set(index1, true);
        bitmap.set(index2, true);
        let entries = if index1 < index2 {
            vec![entry1, entry2]
        } else {
            vec![entry2, entry1]
        };
        BitmapNode { bitmap, entries }
    }

    /// Position in `entries` of the given slot: the number of occupied
    /// slots below it.
    #[inline]
    fn position(&self, index: usize) -> usize {
        (self.bitmap & Bitmap::mask(index)).len()
    }

    fn leaf_node(shift: usize, key: K, value: V, hash: HashBits) -> Node<K, V, P> {
        Node::Bitmap(Self::unit(mask(hash, shift), Entry::Leaf(key, value, hash)))
    }
}

impl<K, V, P: SharedPointerKind> Node<K, V, P> {
    /// A root node holding a single mapping.
    pub(crate) fn unit(key: K, value: V, hash: HashBits) -> Self {
        BitmapNode::leaf_node(0, key, value, hash)
    }

    /// The mapping held by a bitmap node consisting of exactly one leaf.
    fn single_leaf(&self) -> Option<(&K, &V, HashBits)> {
        match self {
            Node::Bitmap(node) if node.entries.len() == 1 => match &node.entries[0] {
                Entry::Leaf(key, value, hash) => Some((key, value, *hash)),
                Entry::Child(_) => None,
            },
            _ => None,
        }
    }

    /// Build the subtree holding two leaves whose slots collided one
    /// level up.
    fn merge_leaves(
        shift: usize,
        key1: K,
        value1: V,
        hash1: HashBits,
        key2: K,
        value2: V,
        hash2: HashBits,
    ) -> Self {
        if shift >= HASH_BITS {
            // Every bit matched on the way down.
            debug_assert_eq!(hash1, hash2);
            return Node::Collision(CollisionNode {
                hash: hash1,
                pairs: vec![(key1, value1), (key2, value2)],
            });
        }
        let index1 = mask(hash1, shift);
        let index2 = mask(hash2, shift);
        if index1 != index2 {
            Node::Bitmap(BitmapNode::pair(
                index1,
                Entry::Leaf(key1, value1, hash1),
                index2,
                Entry::Leaf(key2, value2, hash2),
            ))
        } else {
            let child = Node::merge_leaves(
                shift + HASH_SHIFT,
                key1,
                value1,
                hash1,
                key2,
                value2,
                hash2,
            );
            Node::Bitmap(BitmapNode::unit(
                index1,
                Entry::Child(SharedPointer::new(child)),
            ))
        }
    }

    pub(crate) fn find<'a, S>(
        &'a self,
        hasher: &S,
        hash: HashBits,
        key: &K,
    ) -> Result<Option<&'a V>, S::Error>
    where
        S: KeyHasher<K>,
    {
        let mut node = self;
        let mut shift = 0;
        loop {
            match node {
                Node::Bitmap(bitmap) => {
                    let index = mask(hash, shift);
                    if !bitmap.bitmap.get(index) {
                        return Ok(None);
                    }
                    match &bitmap.entries[bitmap.position(index)] {
                        Entry::Leaf(current, value, current_hash) => {
                            return if *current_hash == hash && hasher.key_eq(current, key)? {
                                Ok(Some(value))
                            } else {
                                Ok(None)
                            };
                        }
                        Entry::Child(child) => node = &**child,
                    }
                }
                Node::Array(array) => match array.children.get(mask(hash, shift)) {
                    Some(child) => node = &**child,
                    None => return Ok(None),
                },
                Node::Collision(coll) => {
                    if coll.hash != hash {
                        return Ok(None);
                    }
                    for (current, value) in &coll.pairs {
                        if hasher.key_eq(current, key)? {
                            return Ok(Some(value));
                        }
                    }
                    return Ok(None);
                }
            }
            shift += HASH_SHIFT;
        }
    }

    /// Visit every mapping below this node, depth first, without
    /// recursing.
    pub(crate) fn walk<B, F>(&self, mut visit: F) -> ControlFlow<B>
    where
        F: FnMut(&K, &V) -> ControlFlow<B>,
    {
        let mut stack: Vec<(&Self, usize)> = Vec::with_capacity(STACK_SIZE);
        stack.push((self, 0));
        while let Some(top) = stack.last_mut() {
            let node: &Self = top.0;
            match node.step(&mut top.1) {
                Step::Leaf(key, value) => {
                    if let ControlFlow::Break(result) = visit(key, value) {
                        return ControlFlow::Break(result);
                    }
                }
                Step::Descend(child) => stack.push((&**child, 0)),
                Step::Done => {
                    stack.pop();
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Advance a cursor over this node's entries.
    fn step(&self, cursor: &mut usize) -> Step<'_, K, V, P> {
        match self {
            Node::Bitmap(node) => match node.entries.get(*cursor) {
                Some(entry) => {
                    *cursor += 1;
                    match entry {
                        Entry::Leaf(key, value, _) => Step::Leaf(key, value),
                        Entry::Child(child) => Step::Descend(child),
                    }
                }
                None => Step::Done,
            },
            Node::Array(node) => {
                while *cursor < HASH_WIDTH {
                    let index = *cursor;
                    *cursor += 1;
                    if let Some(child) = node.children.get(index) {
                        return Step::Descend(child);
                    }
                }
                Step::Done
            }
            Node::Collision(node) => match node.pairs.get(*cursor) {
                Some((key, value)) => {
                    *cursor += 1;
                    Step::Leaf(key, value)
                }
                None => Step::Done,
            },
        }
    }
}

impl<K, V, P> Node<K, V, P>
where
    K: Clone,
    V: Clone,
    P: SharedPointerKind,
{
    /// Return a copy of this node with `key` bound to `value`, along
    /// with whether the key is new.
    pub(crate) fn assoc<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: K,
        value: V,
    ) -> Result<(Self, bool), S::Error>
    where
        S: KeyHasher<K>,
    {
        match self {
            Node::Bitmap(node) => node.assoc(hasher, shift, hash, key, value),
            Node::Array(node) => node
                .assoc(hasher, shift, hash, key, value)
                .map(|(node, added)| (Node::Array(node), added)),
            Node::Collision(node) => node
                .assoc(hasher, hash, key, value)
                .map(|(node, added)| (Node::Collision(node), added)),
        }
    }

    pub(crate) fn without<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: &K,
    ) -> Result<Removed<K, V, P>, S::Error>
    where
        S: KeyHasher<K>,
    {
        match self {
            Node::Bitmap(node) => node.without(hasher, shift, hash, key),
            Node::Array(node) => node.without(hasher, shift, hash, key),
            Node::Collision(node) => node.without(hasher, hash, key),
        }
    }
}

impl<K, V, P> BitmapNode<K, V, P>
where
    K: Clone,
    V: Clone,
    P: SharedPointerKind,
{
    fn assoc<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: K,
        value: V,
    ) -> Result<(Node<K, V, P>, bool), S::Error>
    where
        S: KeyHasher<K>,
    {
        let index = mask(hash, shift);
        let pos = self.position(index);

        if !self.bitmap.get(index) {
            let leaf = Entry::Leaf(key, value, hash);
            if self.entries.len() >= ARRAY_NODE_THRESHOLD && !is_last_level(shift) {
                return Ok((Node::Array(self.promote(shift, index, leaf)), true));
            }
            let mut entries = Vec::with_capacity(self.entries.len() + 1);
            entries.extend_from_slice(&self.entries[..pos]);
            entries.push(leaf);
            entries.extend_from_slice(&self.entries[pos..]);
            let mut bitmap = self.bitmap;
            bitmap.set(index, true);
            return Ok((Node::Bitmap(BitmapNode { bitmap, entries }), true));
        }

        let (entry, added) = match &self.entries[pos] {
            Entry::Leaf(current, current_value, current_hash) => {
                if *current_hash == hash && hasher.key_eq(current, &key)? {
                    (Entry::Leaf(key, value, hash), false)
                } else {
                    let child = Node::merge_leaves(
                        shift + HASH_SHIFT,
                        current.clone(),
                        current_value.clone(),
                        *current_hash,
                        key,
                        value,
                        hash,
                    );
                    (Entry::Child(SharedPointer::new(child)), true)
                }
            }
            Entry::Child(child) => {
                let (child, added) = child.assoc(hasher, shift + HASH_SHIFT, hash, key, value)?;
                (Entry::Child(SharedPointer::new(child)), added)
            }
        };
        let mut entries = self.entries.clone();
        entries[pos] = entry;
        Ok((
            Node::Bitmap(BitmapNode {
                bitmap: self.bitmap,
                entries,
            }),
            added,
        ))
    }

    /// Convert into an array node with one more leaf at `index`.
    fn promote(&self, shift: usize, index: usize, leaf: Entry<K, V, P>) -> ArrayNode<K, V, P> {
        let child_shift = shift + HASH_SHIFT;
        let into_child = |entry: Entry<K, V, P>| match entry {
            Entry::Leaf(key, value, hash) => {
                SharedPointer::new(BitmapNode::leaf_node(child_shift, key, value, hash))
            }
            Entry::Child(child) => child,
        };
        let mut children = SparseChunk::new();
        for (slot, entry) in (&self.bitmap).into_iter().zip(self.entries.iter()) {
            children.insert(slot, into_child(entry.clone()));
        }
        children.insert(index, into_child(leaf));
        ArrayNode { children }
    }

    fn without<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: &K,
    ) -> Result<Removed<K, V, P>, S::Error>
    where
        S: KeyHasher<K>,
    {
        let index = mask(hash, shift);
        if !self.bitmap.get(index) {
            return Ok(Removed::NotFound);
        }
        let pos = self.position(index);

        let replacement = match &self.entries[pos] {
            Entry::Leaf(current, _, current_hash) => {
                if *current_hash != hash || !hasher.key_eq(current, key)? {
                    return Ok(Removed::NotFound);
                }
                None
            }
            Entry::Child(child) => match child.without(hasher, shift + HASH_SHIFT, hash, key)? {
                Removed::NotFound => return Ok(Removed::NotFound),
                Removed::Empty => None,
                Removed::Leaf(key, value, hash) => Some(Entry::Leaf(key, value, hash)),
                Removed::Node(node) => Some(Entry::Child(SharedPointer::new(node))),
            },
        };

        match replacement {
            None => {
                match self.entries.len() {
                    1 => return Ok(Removed::Empty),
                    2 => {
                        if let Entry::Leaf(key, value, hash) = &self.entries[1 - pos] {
                            return Ok(Removed::Leaf(key.clone(), value.clone(), *hash));
                        }
                    }
                    _ => {}
                }
                let mut bitmap = self.bitmap;
                bitmap.set(index, false);
                let mut entries = Vec::with_capacity(self.entries.len() - 1);
                entries.extend_from_slice(&self.entries[..pos]);
                entries.extend_from_slice(&self.entries[pos + 1..]);
                Ok(Removed::Node(Node::Bitmap(BitmapNode { bitmap, entries })))
            }
            Some(entry) => {
                if self.entries.len() == 1 {
                    if let Entry::Leaf(key, value, hash) = entry {
                        return Ok(Removed::Leaf(key, value, hash));
                    }
                }
                let mut entries = self.entries.clone();
                entries[pos] = entry;
                Ok(Removed::Node(Node::Bitmap(BitmapNode {
                    bitmap: self.bitmap,
                    entries,
                })))
            }
        }
    }
}

impl<K, V, P> ArrayNode<K, V, P>
where
    K: Clone,
    V: Clone,
    P: SharedPointerKind,
{
    fn assoc<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: K,
        value: V,
    ) -> Result<(Self, bool), S::Error>
    where
        S: KeyHasher<K>,
    {
        let index = mask(hash, shift);
        let (child, added) = match self.children.get(index) {
            Some(child) => child.assoc(hasher, shift + HASH_SHIFT, hash, key, value)?,
            None => (
                BitmapNode::leaf_node(shift + HASH_SHIFT, key, value, hash),
                true,
            ),
        };
        let mut children = self.children.clone();
        children.insert(index, SharedPointer::new(child));
        Ok((ArrayNode { children }, added))
    }

    fn without<S>(
        &self,
        hasher: &S,
        shift: usize,
        hash: HashBits,
        key: &K,
    ) -> Result<Removed<K, V, P>, S::Error>
    where
        S: KeyHasher<K>,
    {
        let index = mask(hash, shift);
        let child = match self.children.get(index) {
            Some(child) => child,
            None => return Ok(Removed::NotFound),
        };
        let replacement = match child.without(hasher, shift + HASH_SHIFT, hash, key)? {
            Removed::NotFound => return Ok(Removed::NotFound),
            Removed::Empty => None,
            Removed::Leaf(key, value, hash) => Some(BitmapNode::leaf_node(
                shift + HASH_SHIFT,
                key,
                value,
                hash,
            )),
            Removed::Node(node) => Some(node),
        };

        let mut children = self.children.clone();
        match replacement {
            Some(node) => {
                children.insert(index, SharedPointer::new(node));
            }
            None => {
                children.remove(index);
            }
        }

        // Array nodes are never demoted, but one left holding a single
        // leaf collapses into its parent.
        if children.len() == 1 {
            if let Some(first) = children.first_index() {
                if let Some((key, value, hash)) = children[first].single_leaf() {
                    return Ok(Removed::Leaf(key.clone(), value.clone(), hash));
                }
            }
        }
        if children.is_empty() {
            return Ok(Removed::Empty);
        }
        Ok(Removed::Node(Node::Array(ArrayNode { children })))
    }
}

impl<K, V> CollisionNode<K, V>
where
    K: Clone,
    V: Clone,
{
    fn assoc<S>(&self, hasher: &S, hash: HashBits, key: K, value: V) -> Result<(Self, bool), S::Error>
    where
        S: KeyHasher<K>,
    {
        debug_assert_eq!(self.hash, hash);
        for (index, (current, _)) in self.pairs.iter().enumerate() {
            if hasher.key_eq(current, &key)? {
                let mut pairs = self.pairs.clone();
                pairs[index] = (key, value);
                return Ok((CollisionNode { hash, pairs }, false));
            }
        }
        let mut pairs = Vec::with_capacity(self.pairs.len() + 1);
        pairs.extend_from_slice(&self.pairs);
        pairs.push((key, value));
        Ok((CollisionNode { hash, pairs }, true))
    }

    fn without<S, P>(&self, hasher: &S, hash: HashBits, key: &K) -> Result<Removed<K, V, P>, S::Error>
    where
        S: KeyHasher<K>,
        P: SharedPointerKind,
    {
        if self.hash != hash {
            return Ok(Removed::NotFound);
        }
        let mut found = None;
        for (index, (current, _)) in self.pairs.iter().enumerate() {
            if hasher.key_eq(current, key)? {
                found = Some(index);
                break;
            }
        }
        let pos = match found {
            Some(pos) => pos,
            None => return Ok(Removed::NotFound),
        };
        if self.pairs.len() == 2 {
            let (key, value) = self.pairs[1 - pos].clone();
            return Ok(Removed::Leaf(key, value, self.hash));
        }
        let mut pairs = self.pairs.clone();
        pairs.remove(pos);
        Ok(Removed::Node(Node::Collision(CollisionNode {
            hash: self.hash,
            pairs,
        })))
    }
}

enum Step<'a, K, V, P: SharedPointerKind> {
    Leaf(&'a K, &'a V),
    Descend(&'a NodeRef<K, V, P>),
    Done,
}

// Owning iterator

/// Walks a trie with a fixed stack of `(node, cursor)` frames. Holding
/// the root keeps the whole trie alive for as long as the iterator.
pub(crate) struct NodeIter<K, V, P: SharedPointerKind> {
    remaining: usize,
    depth: usize,
    stack: [Option<(NodeRef<K, V, P>, usize)>; STACK_SIZE],
}

impl<K, V, P: SharedPointerKind> NodeIter<K, V, P> {
    pub(crate) fn new(root: Option<&NodeRef<K, V, P>>, size: usize) -> Self {
        let mut result = NodeIter {
            remaining: size,
            depth: 0,
            stack: std::array::from_fn(|_| None),
        };
        if let Some(root) = root {
            result.push(root.clone());
        }
        result
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.remaining
    }

    fn push(&mut self, node: NodeRef<K, V, P>) {
        self.stack[self.depth] = Some((node, 0));
        self.depth += 1;
    }

    fn pop(&mut self) {
        self.depth -= 1;
        self.stack[self.depth] = None;
    }

    /// Produce the next mapping through `project`.
    pub(crate) fn next_with<T, F>(&mut self, project: F) -> Option<T>
    where
        F: FnOnce(&K, &V) -> T,
    {
        loop {
            let top = self.depth.checked_sub(1)?;
            let descend = {
                let (node, cursor) = self.stack[top].as_mut()?;
                match node.step(cursor) {
                    Step::Leaf(key, value) => {
                        let item = project(key, value);
                        self.remaining -= 1;
                        return Some(item);
                    }
                    Step::Descend(child) => Some(child.clone()),
                    Step::Done => None,
                }
            };
            match descend {
                Some(child) => self.push(child),
                None => self.pop(),
            }
        }
    }
}

impl<K, V, P: SharedPointerKind> Clone for NodeIter<K, V, P> {
    fn clone(&self) -> Self {
        NodeIter {
            remaining: self.remaining,
            depth: self.depth,
            stack: self.stack.clone(),
        }
    }
}

// Invariant checks

#[cfg(any(test, feature = "debug"))]
impl<K, V, P: SharedPointerKind> Node<K, V, P> {
    /// Check the structural invariants of the subtree rooted here and
    /// return the number of mappings in it.
    pub(crate) fn check(&self, shift: usize, in_bitmap: bool) -> usize {
        match self {
            Node::Bitmap(node) => {
                assert!(shift < HASH_BITS, "bitmap node below the last level");
                assert_eq!(node.bitmap.len(), node.entries.len());
                assert!(!node.entries.is_empty(), "empty bitmap node");
                if in_bitmap {
                    assert!(
                        self.single_leaf().is_none(),
                        "single leaf bitmap node below a bitmap node"
                    );
                }
                let mut count = 0;
                for (slot, entry) in (&node.bitmap).into_iter().zip(node.entries.iter()) {
                    count += match entry {
                        Entry::Leaf(_, _, hash) => {
                            assert_eq!(slot, mask(*hash, shift), "leaf in the wrong slot");
                            1
                        }
                        Entry::Child(child) => child.check(shift + HASH_SHIFT, true),
                    };
                }
                count
            }
            Node::Array(node) => {
                assert!(!is_last_level(shift), "array node on the last level");
                assert!(!node.children.is_empty(), "empty array node");
                node.children
                    .indices()
                    .map(|index| node.children[index].check(shift + HASH_SHIFT, false))
                    .sum()
            }
            Node::Collision(node) => {
                assert!(shift >= HASH_BITS, "collision node above the last level");
                assert!(node.pairs.len() >= 2, "collision node with a single pair");
                node.pairs.len()
            }
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, P: SharedPointerKind> fmt::Debug for Node<K, V, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Node::Bitmap(node) => {
                write!(f, "Bitmap[ ")?;
                for (slot, entry) in (&node.bitmap).into_iter().zip(node.entries.iter()) {
                    write!(f, "{}: ", slot)?;
                    match entry {
                        Entry::Leaf(k, v, h) => write!(f, "{:?} => {:?} :: {}, ", k, v, h)?,
                        Entry::Child(n) => write!(f, "{:?}, ", n)?,
                    }
                }
                write!(f, "]")
            }
            Node::Array(node) => {
                write!(f, "Array[ ")?;
                for index in node.children.indices() {
                    write!(f, "{}: {:?}, ", index, node.children[index])?;
                }
                write!(f, "]")
            }
            Node::Collision(node) => write!(f, "Coll{:?} :: {}", node.pairs, node.hash),
        }
    }
}
