// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::context::{Context, ContextVar, Value};

/// Undoes one [`ContextVar::set`].
///
/// Pass it to [`ContextVar::reset`] to restore the variable's previous
/// value. It can only be used once.
pub struct Token<T> {
    context: Context,
    var: ContextVar<T>,
    old: Option<Value>,
    used: AtomicBool,
}

impl<T> Token<T> {
    pub(crate) fn new(context: Context, var: ContextVar<T>, old: Option<Value>) -> Self {
        Token {
            context,
            var,
            old,
            used: AtomicBool::new(false),
        }
    }

    /// The variable that was set.
    pub fn var(&self) -> &ContextVar<T> {
        &self.var
    }

    /// The context the variable was set in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The variable's value before the set, or `None` if it had none.
    pub fn old_value(&self) -> Option<&T>
    where
        T: 'static,
    {
        self.old.as_ref().and_then(Value::downcast_ref::<T>)
    }

    pub(crate) fn old(&self) -> Option<&Value> {
        self.old.as_ref()
    }

    /// Test whether the token has been used for a reset.
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Mark the token used, returning whether it already was.
    pub(crate) fn mark_used(&self) -> bool {
        self.used.swap(true, Ordering::AcqRel)
    }
}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<Token")?;
        if self.is_used() {
            f.write_str(" used")?;
        }
        write!(f, " var={:?} at {:p}>", self.var.key(), self)
    }
}
