// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub(crate) use self::lock::Lock;

mod lock {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Thread safe lock: wraps a `Mutex` and shrugs off poisoning.
    ///
    /// Everything guarded by a `Lock` in this crate is replaced
    /// wholesale under the guard, so a panic while holding it cannot
    /// leave half-written state behind.
    #[derive(Default)]
    pub(crate) struct Lock<A> {
        lock: Mutex<A>,
    }

    impl<A> Lock<A> {
        pub(crate) const fn new(value: A) -> Self {
            Lock {
                lock: Mutex::new(value),
            }
        }

        #[inline]
        pub(crate) fn lock(&self) -> MutexGuard<'_, A> {
            self.lock.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
