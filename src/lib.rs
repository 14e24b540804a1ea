// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Execution contexts on a persistent hash map
//!
//! This crate provides [`Context`]s, mappings from [`ContextVar`]s to
//! values that follow a logical thread of execution around, and the
//! persistent map they're built on.
//!
//! ## The map
//!
//! [`Hamt`] is an immutable [hash array mapped trie][hamt]. Updating it
//! produces a new map and leaves the old one alone; the two share every
//! node the update didn't touch, so an update costs O(log n) time and
//! memory however big the map is, and a clone costs O(1).
//!
//! The trie is made of three kinds of node: sparse bitmap nodes, dense
//! array nodes for crowded levels, and collision nodes for keys whose
//! 32 bit hashes are identical. Nothing in the crate recurses on the
//! trie's depth; iterators keep an explicit stack.
//!
//! Hashing and key comparison go through a [`KeyHasher`], which is
//! allowed to fail. [`StdHasher`] is the one for ordinary [`Hash`] +
//! [`Eq`] keys; with it, the fallible operations get infallible
//! counterparts like [`get`][GenericHamt::get] and
//! [`update`][GenericHamt::update].
//!
//! ```
//! # #[macro_use] extern crate ctxvars;
//! # use ctxvars::Hamt;
//! let map: Hamt<&str, i32> = hamt!{"one" => 1, "two" => 2};
//! let bigger = map.update("three", 3);
//! assert_eq!(2, map.len());
//! assert_eq!(Some(&3), bigger.get(&"three"));
//! ```
//!
//! ## Contexts
//!
//! A [`ContextVar`] is read and written through the current context of
//! an [`ExecutionContextStack`]. Contexts are entered and exited in
//! strict LIFO order; [`Context::run`] does both around a closure.
//! [`ContextVar::set`] returns a [`Token`] that undoes it, once.
//!
//! ```
//! # use ctxvars::{ContextVar, ExecutionContextStack};
//! let user = ContextVar::with_default("user", "nobody");
//! let mut stack = ExecutionContextStack::new();
//!
//! let token = user.set(&mut stack, "alice");
//! let isolated = stack.copy_current();
//! user.reset(&mut stack, &token).unwrap();
//!
//! assert_eq!(Ok("nobody"), user.get(&mut stack));
//! assert_eq!(Some("alice"), isolated.get(&user));
//! ```
//!
//! Where a thread is the unit of execution, [`with_thread_stack`] gives
//! each thread its own stack.
//!
//! ## Watchers and unraisable errors
//!
//! [`add_watcher`][context::add_watcher] registers a callback run on
//! every context switch. Watchers can't make a switch fail: their
//! errors and panics go to the process wide unraisable hook, see
//! [`set_unraisable_hook`][context::watch::set_unraisable_hook].
//!
//! ## Feature Flags
//!
//! This crate offers the following features:
//!
//! | Feature | Description |
//! | ------- | ----------- |
//! | [`serde`](https://crates.io/crates/serde) | [`Serialize`](https://docs.rs/serde/latest/serde/trait.Serialize.html) and [`Deserialize`](https://docs.rs/serde/latest/serde/trait.Deserialize.html) for [`GenericHamt`] |
//! | [`proptest`](https://crates.io/crates/proptest) | Strategies for [`Hamt`] |
//! | [`quickcheck`](https://crates.io/crates/quickcheck) | [`quickcheck::Arbitrary`](https://docs.rs/quickcheck/latest/quickcheck/trait.Arbitrary.html) for [`GenericHamt`] |
//! | [`arbitrary`](https://crates.io/crates/arbitrary/) | [`arbitrary::Arbitrary`](https://docs.rs/arbitrary/latest/arbitrary/trait.Arbitrary.html) for [`GenericHamt`] |
//! | [`triomphe`](https://crates.io/crates/triomphe/) | Use [`triomphe::Arc`](https://docs.rs/triomphe/latest/triomphe/struct.Arc.html) as the default shared pointer |
//! | `small-chunks` | A branching factor of 4 instead of 32, mostly for testing deep tries |
//! | `debug` | Exposes `assert_invariants` on maps |
//!
//! [hamt]: https://en.wikipedia.org/wiki/Hash_array_mapped_trie
//! [Hash]: std::hash::Hash

#![forbid(rust_2018_idioms)]
#![deny(nonstandard_style)]
#![warn(unreachable_pub, missing_docs)]

#[macro_use]
mod util;

mod config;
mod nodes;
mod sync;

/// Hashing adapters and the map's implementation.
pub mod hash {
    pub mod key;
    pub(crate) mod map;
}

pub mod context;
pub mod error;
pub mod shared_ptr;

/// The persistent hash map.
pub mod hamt {
    pub use crate::hash::map::*;
}

#[cfg(any(test, feature = "serde"))]
#[doc(hidden)]
pub mod ser;

#[cfg(feature = "arbitrary")]
#[doc(hidden)]
pub mod arbitrary;

#[cfg(feature = "quickcheck")]
#[doc(hidden)]
pub mod quickcheck;

#[cfg(any(test, feature = "proptest"))]
pub mod proptest;


pub use crate::context::{with_thread_stack, Context, ContextVar, ExecutionContextStack, Token};
pub use crate::error::Error;
pub use crate::hamt::{GenericHamt, Hamt};
pub use crate::hash::key::{KeyHasher, StdHasher};
