// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Execution contexts.
//!
//! A [`Context`] maps [`ContextVar`]s to values. It's a snapshot: the
//! mapping is a [`Hamt`][crate::Hamt], so copying a context is O(1)
//! and setting a variable in one context is invisible in every copy of
//! it.
//!
//! Contexts are entered and exited on an [`ExecutionContextStack`],
//! and variables are read and written through the stack's current
//! context.
//!
//! # Examples
//!
//! ```
//! # use ctxvars::{Context, ContextVar, ExecutionContextStack};
//! let var = ContextVar::with_default("request_id", 0);
//! let mut stack = ExecutionContextStack::new();
//!
//! let context = Context::new();
//! context
//!     .run(&mut stack, |stack| {
//!         var.set(stack, 42);
//!         assert_eq!(Ok(42), var.get(stack));
//!     })
//!     .unwrap();
//!
//! assert_eq!(Ok(0), var.get(&mut stack));
//! assert_eq!(Some(42), context.get(&var));
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::sync::{Arc, MutexGuard};

use crate::error::Error;
use crate::hamt::{GenericHamt, Iter, Keys, Values};
use crate::hash::key::StdHasher;
use crate::shared_ptr::DefaultSharedPtr;
use crate::sync::Lock;

mod stack;
mod token;
mod var;
pub mod watch;

pub use self::stack::{with_thread_stack, ExecutionContextStack};
pub use self::token::Token;
pub use self::var::{ContextVar, Value, VarKey};
pub use self::watch::{add_watcher, clear_watcher, ContextEvent, WatcherId};

/// The mapping held by a [`Context`].
pub type Vars = GenericHamt<VarKey, Value, StdHasher, DefaultSharedPtr>;

pub(crate) struct State {
    pub(crate) vars: Vars,
    pub(crate) prev: Option<Context>,
    pub(crate) entered: bool,
}

/// A mapping from context variables to values.
///
/// `Context` is a handle: clones refer to the same context, and
/// [`ptr_eq`][Context::ptr_eq] tells them apart from copies. Use
/// [`copy`][Context::copy] for an independent context with the same
/// contents.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Lock<State>>,
}

impl Context {
    /// Construct an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vars(Vars::new())
    }

    fn from_vars(vars: Vars) -> Self {
        Context {
            inner: Arc::new(Lock::new(State {
                vars,
                prev: None,
                entered: false,
            })),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock()
    }

    /// Construct a new, unentered context with the same contents.
    ///
    /// Time: O(1)
    #[must_use]
    pub fn copy(&self) -> Self {
        Self::from_vars(self.vars())
    }

    /// Enter this context on `stack`.
    ///
    /// See [`ExecutionContextStack::enter`].
    pub fn enter(&self, stack: &mut ExecutionContextStack) -> Result<(), Error> {
        stack.enter(self)
    }

    /// Exit this context on `stack`.
    ///
    /// See [`ExecutionContextStack::exit`].
    pub fn exit(&self, stack: &mut ExecutionContextStack) -> Result<(), Error> {
        stack.exit(self)
    }

    /// Call `f` with this context entered on `stack`.
    ///
    /// The context is exited when `f` returns, and also when it
    /// panics.
    pub fn run<R, F>(&self, stack: &mut ExecutionContextStack, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut ExecutionContextStack) -> R,
    {
        stack.enter(self)?;
        let mut guard = ExitGuard {
            stack,
            context: self,
            armed: true,
        };
        let result = f(&mut *guard.stack);
        guard.armed = false;
        guard.stack.exit(self)?;
        Ok(result)
    }

    /// Test whether this context is entered on some stack.
    pub fn is_entered(&self) -> bool {
        self.state().entered
    }

    /// Test whether two handles refer to the same context.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A snapshot of the context's contents.
    ///
    /// Time: O(1)
    pub fn vars(&self) -> Vars {
        self.state().vars.clone()
    }

    pub(crate) fn set_vars(&self, vars: Vars) {
        self.state().vars = vars;
    }

    /// Get the value of `var` in this context.
    ///
    /// The variable's default isn't consulted.
    pub fn get<T>(&self, var: &ContextVar<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.vars()
            .get(var.key())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Get the value of `var` in this context, or `default`.
    pub fn get_or<T>(&self, var: &ContextVar<T>, default: T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(var).unwrap_or(default)
    }

    /// Test whether `var` has a value in this context.
    pub fn contains<T>(&self, var: &ContextVar<T>) -> bool {
        self.contains_key(var.key())
    }

    /// Test whether the variable identified by `key` has a value in
    /// this context.
    pub fn contains_key(&self, key: &VarKey) -> bool {
        self.vars().get(key).is_some()
    }

    /// Get the value for `key` as a `T`.
    ///
    /// Fails with [`Error::TypeMismatch`] if the value has another
    /// type.
    pub fn lookup<T>(&self, key: &VarKey) -> Result<Option<T>, Error>
    where
        T: Any + Clone,
    {
        match self.vars().get(key) {
            None => Ok(None),
            Some(value) => match value.downcast_ref::<T>() {
                Some(value) => Ok(Some(value.clone())),
                None => Err(Error::TypeMismatch {
                    expected: type_name::<T>(),
                    key: format!("{:?}", key),
                }),
            },
        }
    }

    /// The number of variables set in this context.
    pub fn len(&self) -> usize {
        self.state().vars.len()
    }

    /// Test whether no variables are set in this context.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the variables set in this context.
    pub fn keys(&self) -> Keys<VarKey, Value, DefaultSharedPtr> {
        self.vars().keys()
    }

    /// Iterate over the values in this context.
    pub fn values(&self) -> Values<VarKey, Value, DefaultSharedPtr> {
        self.vars().values()
    }

    /// Iterate over variable/value pairs.
    pub fn items(&self) -> Iter<VarKey, Value, DefaultSharedPtr> {
        self.vars().iter()
    }

    /// Visit every variable and value in the context.
    pub fn trace<F>(&self, visit: F)
    where
        F: FnMut(&VarKey, &Value),
    {
        self.vars().trace(visit)
    }
}

struct ExitGuard<'a> {
    stack: &'a mut ExecutionContextStack,
    context: &'a Context,
    armed: bool,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Unwinding: there's nobody to report a failed exit to.
            let _ = self.stack.exit(self.context);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Contexts are equal when they hold the same variables bound to the
/// same values. Values are compared by identity.
impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.vars() == other.vars()
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Context at {:p}>", Arc::as_ptr(&self.inner))
    }
}

impl IntoIterator for &Context {
    type Item = (VarKey, Value);
    type IntoIter = Iter<VarKey, Value, DefaultSharedPtr>;

    fn into_iter(self) -> Self::IntoIter {
        self.items()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use static_assertions::assert_impl_all;
    use std::panic::{self, AssertUnwindSafe};

    assert_impl_all!(Context: Send, Sync);
    assert_impl_all!(ContextVar<i32>: Send, Sync);
    assert_impl_all!(Token<i32>: Send, Sync);

    #[test]
    fn copies_are_independent() {
        let var = ContextVar::new("x");
        let mut stack = ExecutionContextStack::new();
        let context = Context::new();
        context
            .run(&mut stack, |stack| {
                var.set(stack, 1);
            })
            .unwrap();

        let copy = context.copy();
        assert!(!copy.ptr_eq(&context));
        assert_eq!(context, copy);
        copy.run(&mut stack, |stack| {
            var.set(stack, 2);
        })
        .unwrap();

        assert_eq!(Some(1), context.get(&var));
        assert_eq!(Some(2), copy.get(&var));
        assert!(context != copy);
    }

    #[test]
    fn read_access() {
        let x = ContextVar::new("x");
        let y = ContextVar::with_default("y", "why");
        let unset: ContextVar<u8> = ContextVar::new("unset");
        let mut stack = ExecutionContextStack::new();
        x.set(&mut stack, 1);
        y.set(&mut stack, "y");
        let context = stack.current().unwrap().clone();

        assert_eq!(2, context.len());
        assert!(!context.is_empty());
        assert!(context.contains(&x));
        assert!(!context.contains(&unset));
        assert_eq!(None, context.get(&unset));
        assert_eq!(7, context.get_or(&unset, 7));
        assert_eq!(Some("y"), context.get(&y));

        let keys: Vec<VarKey> = context.keys().collect();
        assert_eq!(2, keys.len());
        assert!(keys.contains(x.key()));
        assert!(keys.contains(y.key()));
        assert_eq!(2, context.values().count());
        for (key, value) in &context {
            if key == *x.key() {
                assert_eq!(Some(&1), value.downcast_ref::<i32>());
            } else {
                assert_eq!(Some(&"y"), value.downcast_ref::<&str>());
            }
        }
        let mut traced = 0;
        context.trace(|_, _| traced += 1);
        assert_eq!(2, traced);
    }

    #[test]
    fn lookup_checks_the_type() {
        let var = ContextVar::new("typed");
        let mut stack = ExecutionContextStack::new();
        var.set(&mut stack, 5_u32);
        let context = stack.current().unwrap().clone();
        assert_eq!(Ok(Some(5_u32)), context.lookup::<u32>(var.key()));
        assert!(matches!(
            context.lookup::<String>(var.key()),
            Err(Error::TypeMismatch { .. })
        ));
        let other: ContextVar<u32> = ContextVar::new("other");
        assert_eq!(Ok(None), context.lookup::<u32>(other.key()));
    }

    #[test]
    fn run_exits_on_panic() {
        let mut stack = ExecutionContextStack::new();
        let context = Context::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            context.run(&mut stack, |_| panic!("inside run"))
        }));
        assert!(result.is_err());
        assert!(!context.is_entered());
        assert!(stack.current().is_none());
        context.run(&mut stack, |_| ()).unwrap();
    }

    #[test]
    fn run_nests() {
        let var = ContextVar::with_default("depth", 0);
        let mut stack = ExecutionContextStack::new();
        let outer = Context::new();
        let inner = Context::new();
        let depth = outer
            .run(&mut stack, |stack| {
                var.set(stack, 1);
                inner
                    .run(stack, |stack| {
                        var.set(stack, 2);
                        var.get(stack)
                    })
                    .unwrap()
            })
            .unwrap();
        assert_eq!(Ok(2), depth);
        assert_eq!(Some(1), outer.get(&var));
        assert_eq!(Some(2), inner.get(&var));
        assert!(matches!(
            outer.run(&mut stack, |stack| outer.run(stack, |_| ())),
            Ok(Err(Error::ProtocolViolation(_)))
        ));
    }

    #[test]
    fn shared_read_only_across_threads() {
        let var = ContextVar::new("shared");
        let mut stack = ExecutionContextStack::new();
        var.set(&mut stack, String::from("hello"));
        let context = stack.current().unwrap().clone();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let context = context.clone();
                let var = var.clone();
                std::thread::spawn(move || context.get(&var))
            })
            .collect();
        for handle in handles {
            assert_eq!(Some(String::from("hello")), handle.join().unwrap());
        }
    }
}
