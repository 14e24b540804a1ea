// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::context::{Context, ExecutionContextStack, Token};
use crate::error::{Error, ProtocolViolation};
use crate::sync::Lock;
use crate::util::into_ok;

struct VarInfo {
    name: String,
    name_hash: u64,
}

/// The identity of a [`ContextVar`], used as its key in a
/// [`Context`].
///
/// Keys compare by identity: two variables with the same name are
/// still different variables.
#[derive(Clone)]
pub struct VarKey(Arc<VarInfo>);

impl VarKey {
    fn new(name: String) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        VarKey(Arc::new(VarInfo {
            name,
            name_hash: hasher.finish(),
        }))
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl PartialEq for VarKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for VarKey {}

// Variables allocated one after the other, or sharing a name, still
// get well spread hashes.
impl Hash for VarKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let addr = Arc::as_ptr(&self.0) as usize as u64;
        (addr ^ self.0.name_hash).hash(state)
    }
}

impl fmt::Debug for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ContextVar name={:?} at {:p}>", self.0.name, Arc::as_ptr(&self.0))
    }
}

/// A value stored in a [`Context`].
///
/// Values compare by identity, so two contexts are equal only if they
/// share the values themselves.
#[derive(Clone)]
pub struct Value(Arc<dyn Any + Send + Sync>);

impl Value {
    pub(crate) fn new<T: Any + Send + Sync>(value: T) -> Self {
        Value(Arc::new(value))
    }

    /// Get the value as a `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Test whether two values are the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Value at {:p}>", Arc::as_ptr(&self.0))
    }
}

struct Cached<T> {
    value: T,
    stack: u64,
    version: u64,
}

/// A variable whose value depends on the current [`Context`].
///
/// Clones are the same variable. Lookups go through a one slot cache,
/// valid for one stack until its current context changes; see
/// [`without_cache`][ContextVar::without_cache].
pub struct ContextVar<T> {
    key: VarKey,
    default: Option<T>,
    cache: Arc<Lock<Option<Cached<T>>>>,
    caching: bool,
}

impl<T> ContextVar<T> {
    /// The variable's name.
    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// The variable's key in a [`Context`].
    pub fn key(&self) -> &VarKey {
        &self.key
    }

    /// The value [`get`][ContextVar::get] falls back to.
    pub fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }
}

impl<T> ContextVar<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Construct a variable with no default.
    #[must_use]
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self::build(name.into(), None)
    }

    /// Construct a variable with a default value.
    #[must_use]
    pub fn with_default<N: Into<String>>(name: N, default: T) -> Self {
        Self::build(name.into(), Some(default))
    }

    fn build(name: String, default: Option<T>) -> Self {
        ContextVar {
            key: VarKey::new(name),
            default,
            cache: Arc::new(Lock::new(None)),
            caching: true,
        }
    }

    /// Turn off the lookup cache for this handle.
    ///
    /// This never changes what [`get`][ContextVar::get] returns.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.caching = false;
        self
    }

    /// Get the variable's value in the current context.
    ///
    /// Falls back to the variable's default, and fails with
    /// [`Error::NotFound`] if there's none. A stack with no current
    /// context gets an empty ambient one.
    pub fn get(&self, stack: &mut ExecutionContextStack) -> Result<T, Error> {
        match self.lookup(stack) {
            Some(value) => Ok(value),
            None => self.default.clone().ok_or_else(|| Error::NotFound {
                var: format!("{:?}", self.key),
            }),
        }
    }

    /// Get the variable's value in the current context, or `default`.
    ///
    /// The variable's own default isn't consulted.
    pub fn get_or(&self, stack: &mut ExecutionContextStack, default: T) -> T {
        self.lookup(stack).unwrap_or(default)
    }

    fn lookup(&self, stack: &mut ExecutionContextStack) -> Option<T> {
        let context = stack.current_or_init().clone();
        if !self.caching {
            return context.get(self);
        }
        // Held across the read and the store. `set` and `reset` write the
        // slot only after changing the context.
        let mut slot = self.cache.lock();
        if let Some(cached) = &*slot {
            if cached.stack == stack.id() && cached.version == stack.version() {
                return Some(cached.value.clone());
            }
        }
        let value = context.get(self)?;
        *slot = Some(Cached {
            value: value.clone(),
            stack: stack.id(),
            version: stack.version(),
        });
        Some(value)
    }

    fn store(&self, stack: &ExecutionContextStack, value: Option<&T>) {
        let cached = match value {
            Some(value) if self.caching => Some(Cached {
                value: value.clone(),
                stack: stack.id(),
                version: stack.version(),
            }),
            _ => None,
        };
        *self.cache.lock() = cached;
    }

    /// Bind the variable to `value` in the current context.
    ///
    /// The returned [`Token`] can undo this with
    /// [`reset`][ContextVar::reset].
    pub fn set(&self, stack: &mut ExecutionContextStack, value: T) -> Token<T> {
        let context = stack.current_or_init().clone();
        let vars = context.vars();
        let old = vars.get(&self.key).cloned();
        context.set_vars(vars.update(self.key.clone(), Value::new(value.clone())));
        self.store(stack, Some(&value));
        Token::new(context, self.clone(), old)
    }

    /// Restore the value the variable had before the
    /// [`set`][ContextVar::set] that produced `token`.
    ///
    /// A token works once, for the variable that produced it, in the
    /// context it was produced in.
    pub fn reset(&self, stack: &mut ExecutionContextStack, token: &Token<T>) -> Result<(), Error> {
        if token.is_used() {
            return Err(ProtocolViolation::TokenUsed(format!("{:?}", token)).into());
        }
        if token.var().key() != &self.key {
            return Err(ProtocolViolation::TokenVarMismatch(format!("{:?}", token)).into());
        }
        let context = stack.current_or_init().clone();
        if !context.ptr_eq(token.context()) {
            return Err(ProtocolViolation::TokenContextMismatch(format!("{:?}", token)).into());
        }
        if token.mark_used() {
            return Err(ProtocolViolation::TokenUsed(format!("{:?}", token)).into());
        }

        let vars = context.vars();
        let result = match token.old() {
            Some(old) => {
                context.set_vars(vars.update(self.key.clone(), old.clone()));
                Ok(())
            }
            None => {
                let without = into_ok(vars.without(&self.key));
                if without.ptr_eq(&vars) {
                    Err(Error::NotFound {
                        var: format!("{:?}", self.key),
                    })
                } else {
                    context.set_vars(without);
                    Ok(())
                }
            }
        };
        // Cleared after the context changes, never before.
        self.store(stack, None);
        result
    }

    /// Bind the variable to `value` while `f` runs, then restore it.
    ///
    /// The value is restored when `f` panics, too.
    pub fn with_value<R, F>(&self, stack: &mut ExecutionContextStack, value: T, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut ExecutionContextStack) -> R,
    {
        let token = self.set(stack, value);
        let mut guard = ResetGuard {
            stack,
            var: self,
            token: &token,
            armed: true,
        };
        let result = f(&mut *guard.stack);
        guard.armed = false;
        self.reset(&mut *guard.stack, &token)?;
        Ok(result)
    }
}

struct ResetGuard<'a, T: Clone + Send + Sync + 'static> {
    stack: &'a mut ExecutionContextStack,
    var: &'a ContextVar<T>,
    token: &'a Token<T>,
    armed: bool,
}

impl<T: Clone + Send + Sync + 'static> Drop for ResetGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.var.reset(&mut *self.stack, self.token);
        }
    }
}

impl<T: Clone> Clone for ContextVar<T> {
    fn clone(&self) -> Self {
        ContextVar {
            key: self.key.clone(),
            default: self.default.clone(),
            cache: self.cache.clone(),
            caching: self.caching,
        }
    }
}

impl<T> PartialEq for ContextVar<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for ContextVar<T> {}

impl<T> Hash for ContextVar<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for ContextVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ContextVar name={:?}", self.key.name())?;
        if let Some(default) = &self.default {
            write!(f, " default={:?}", default)?;
        }
        write!(f, " at {:p}>", Arc::as_ptr(&self.key.0))
    }
}
