// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::watch::{self, ContextEvent};
use crate::context::Context;
use crate::error::{Error, ProtocolViolation};

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);

/// The chain of entered contexts for one logical thread of execution.
///
/// Every variable access goes through a stack: the stack's current
/// context is where [`ContextVar`][crate::ContextVar]s are looked up and
/// set. A thread can keep one in [`with_thread_stack`]; a task scheduler
/// would keep one per task.
///
/// Contexts entered on a stack are linked through their `prev` pointer,
/// and must be exited in the reverse order. Dropping a stack releases
/// every context still entered on it.
pub struct ExecutionContextStack {
    id: u64,
    current: Option<Context>,
    version: u64,
}

impl ExecutionContextStack {
    /// Construct a stack with no current context.
    #[must_use]
    pub fn new() -> Self {
        ExecutionContextStack {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            current: None,
            version: 0,
        }
    }

    /// A process wide unique identifier for this stack.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A counter bumped on every enter and exit.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The current context, if any.
    #[inline]
    pub fn current(&self) -> Option<&Context> {
        self.current.as_ref()
    }

    /// The current context, creating an empty ambient one if the stack
    /// has none.
    ///
    /// The ambient context isn't entered: it just becomes current.
    pub fn current_or_init(&mut self) -> &Context {
        self.current.get_or_insert_with(Context::new)
    }

    /// Copy the current context.
    ///
    /// Time: O(1)
    #[must_use]
    pub fn copy_current(&mut self) -> Context {
        self.current_or_init().copy()
    }

    /// Make `context` the current context.
    ///
    /// Fails if `context` is already entered, here or on another stack.
    pub fn enter(&mut self, context: &Context) -> Result<(), Error> {
        {
            let mut state = context.state();
            if state.entered {
                return Err(ProtocolViolation::AlreadyEntered(format!("{:?}", context)).into());
            }
            state.prev = self.current.take();
            state.entered = true;
        }
        self.current = Some(context.clone());
        self.switched();
        Ok(())
    }

    /// Restore the context that was current before `context` was
    /// entered.
    ///
    /// `context` must be the current context.
    pub fn exit(&mut self, context: &Context) -> Result<(), Error> {
        {
            let mut state = context.state();
            if !state.entered {
                return Err(ProtocolViolation::NotEntered(format!("{:?}", context)).into());
            }
            match &self.current {
                Some(current) if current.ptr_eq(context) => {}
                _ => return Err(ProtocolViolation::ExitMismatch(format!("{:?}", context)).into()),
            }
            self.current = state.prev.take();
            state.entered = false;
        }
        self.switched();
        Ok(())
    }

    fn switched(&mut self) {
        self.version += 1;
        watch::notify(ContextEvent::Switched, self.current.as_ref());
    }
}

impl Default for ExecutionContextStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionContextStack {
    fn drop(&mut self) {
        let mut next = self.current.take();
        while let Some(context) = next {
            next = {
                let mut state = context.state();
                state.entered = false;
                state.prev.take()
            };
        }
    }
}

impl fmt::Debug for ExecutionContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContextStack")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("current", &self.current)
            .finish()
    }
}

thread_local! {
    static THREAD_STACK: RefCell<ExecutionContextStack> = RefCell::new(ExecutionContextStack::new());
}

/// Call `f` with the calling thread's own stack.
///
/// # Panics
///
/// Panics if called again from inside `f`.
pub fn with_thread_stack<R, F>(f: F) -> R
where
    F: FnOnce(&mut ExecutionContextStack) -> R,
{
    THREAD_STACK.with(|stack| f(&mut stack.borrow_mut()))
}
