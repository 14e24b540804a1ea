// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Context switch watchers and the unraisable error hook.
//!
//! Watchers are process wide callbacks invoked on every enter and exit,
//! on every [`ExecutionContextStack`][crate::ExecutionContextStack].
//! An enter or exit that got past its checks always succeeds, so a
//! watcher can't fail it: a watcher that returns an error or panics is
//! reported to the unraisable hook and otherwise ignored.

use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::MAX_WATCHERS;
use crate::context::Context;
use crate::error::{Error, WatcherError};
use crate::sync::Lock;

/// A boxed error from a watcher.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// What happened to the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    /// A context was entered or exited, so the stack's current context
    /// changed.
    Switched,
}

impl fmt::Display for ContextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextEvent::Switched => f.write_str("context switched"),
        }
    }
}

/// Identifies a registered watcher.
pub type WatcherId = usize;

type Watcher = Arc<dyn Fn(ContextEvent, Option<&Context>) -> Result<(), BoxError> + Send + Sync>;

const NO_WATCHER: Option<Watcher> = None;

static WATCHERS: Lock<[Option<Watcher>; MAX_WATCHERS]> = Lock::new([NO_WATCHER; MAX_WATCHERS]);

/// Register a watcher, returning its id.
///
/// The callback gets the event and the stack's new current context,
/// which is `None` when the last context was exited.
///
/// Fails with [`WatcherError::TooMany`] when all eight slots are in
/// use.
pub fn add_watcher<F>(callback: F) -> Result<WatcherId, Error>
where
    F: Fn(ContextEvent, Option<&Context>) -> Result<(), BoxError> + Send + Sync + 'static,
{
    let mut watchers = WATCHERS.lock();
    match watchers.iter().position(Option::is_none) {
        Some(id) => {
            watchers[id] = Some(Arc::new(callback));
            Ok(id)
        }
        None => Err(WatcherError::TooMany.into()),
    }
}

/// Unregister the watcher with the given id.
pub fn clear_watcher(id: WatcherId) -> Result<(), Error> {
    let mut watchers = WATCHERS.lock();
    match watchers.get_mut(id) {
        None => Err(WatcherError::InvalidId(id).into()),
        Some(slot) => match slot.take() {
            None => Err(WatcherError::NotSet(id).into()),
            Some(_) => Ok(()),
        },
    }
}

pub(crate) fn notify(event: ContextEvent, context: Option<&Context>) {
    // Callbacks run without the registry lock, so they may add or clear
    // watchers themselves.
    let watchers = WATCHERS.lock().clone();
    for watcher in watchers.iter().flatten() {
        let cause = match panic::catch_unwind(AssertUnwindSafe(|| watcher(event, context))) {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(payload) => BoxError::from(panic_message(payload.as_ref())),
        };
        report_unraisable(UnraisableError {
            message: format!(
                "ignored error in {} watcher callback for {}",
                event,
                match context {
                    Some(context) => format!("{:?}", context),
                    None => "None".to_string(),
                }
            ),
            cause,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

// Unraisable errors

/// An error that happened where nobody could be handed it.
#[derive(Debug)]
pub struct UnraisableError {
    /// Where it happened.
    pub message: String,
    /// What went wrong.
    pub cause: BoxError,
}

impl fmt::Display for UnraisableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.cause)
    }
}

/// A handler for [`UnraisableError`]s.
pub type UnraisableHook = Arc<dyn Fn(&UnraisableError) + Send + Sync>;

static HOOK: RwLock<Option<UnraisableHook>> = RwLock::new(None);

/// Replace the process wide unraisable hook.
///
/// The default hook writes the error to stderr.
pub fn set_unraisable_hook(hook: UnraisableHook) {
    *HOOK.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
}

/// Unregister the current unraisable hook and return it, or the default
/// hook if none was set.
pub fn take_unraisable_hook() -> UnraisableHook {
    HOOK.write()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
        .unwrap_or_else(|| Arc::new(default_hook) as UnraisableHook)
}

fn default_hook(err: &UnraisableError) {
    eprintln!("{}", err);
}

pub(crate) fn report_unraisable(err: UnraisableError) {
    let hook = HOOK.read().unwrap_or_else(PoisonError::into_inner).clone();
    match hook {
        Some(hook) => hook(&err),
        None => default_hook(&err),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ExecutionContextStack;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Watchers and the hook are process wide.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> std::sync::MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[test]
    fn watcher_sees_switches() {
        let _serial = serial();
        let context = Context::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let left = Arc::new(AtomicUsize::new(0));
        let id = {
            let context = context.clone();
            let seen = seen.clone();
            let left = left.clone();
            add_watcher(move |event, current| {
                assert_eq!(ContextEvent::Switched, event);
                match current {
                    Some(current) if current.ptr_eq(&context) => {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    None => {
                        left.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(_) => {}
                }
                Ok(())
            })
            .unwrap()
        };

        let mut stack = ExecutionContextStack::new();
        context.run(&mut stack, |_| ()).unwrap();
        clear_watcher(id).unwrap();
        context.run(&mut stack, |_| ()).unwrap();

        assert_eq!(1, seen.load(Ordering::SeqCst));
        assert!(left.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn failing_watchers_are_swallowed() {
        let _serial = serial();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let previous = take_unraisable_hook();
        {
            let reports = reports.clone();
            set_unraisable_hook(Arc::new(move |err: &UnraisableError| {
                reports.lock().unwrap().push(err.to_string());
            }));
        }
        let context = Context::new();
        let failing = {
            let context = context.clone();
            add_watcher(move |_, current| match current {
                Some(current) if current.ptr_eq(&context) => Err("nope".into()),
                _ => Ok(()),
            })
            .unwrap()
        };
        let panicking = {
            let context = context.clone();
            add_watcher(move |_, current| match current {
                Some(current) if current.ptr_eq(&context) => panic!("boom"),
                _ => Ok(()),
            })
            .unwrap()
        };

        let mut stack = ExecutionContextStack::new();
        let result = context.run(&mut stack, |stack| stack.current().is_some());
        clear_watcher(failing).unwrap();
        clear_watcher(panicking).unwrap();
        set_unraisable_hook(previous);

        assert_eq!(Ok(true), result);
        assert!(stack.current().is_none());
        let reports = reports.lock().unwrap();
        assert_eq!(2, reports.len());
        assert!(reports.iter().any(|report| report.ends_with(": nope")));
        assert!(reports.iter().any(|report| report.ends_with(": panicked: boom")));
    }

    #[test]
    fn hook_can_replace_hooks() {
        let _serial = serial();
        let previous = take_unraisable_hook();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            set_unraisable_hook(Arc::new(move |_: &UnraisableError| {
                calls.fetch_add(1, Ordering::SeqCst);
                set_unraisable_hook(take_unraisable_hook());
            }));
        }
        report_unraisable(UnraisableError {
            message: "while testing".to_string(),
            cause: "first".into(),
        });
        report_unraisable(UnraisableError {
            message: "while testing".to_string(),
            cause: "second".into(),
        });
        set_unraisable_hook(previous);
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn registry_is_bounded() {
        let _serial = serial();
        let mut ids = Vec::new();
        let err = loop {
            match add_watcher(|_, _| Ok(())) {
                Ok(id) => ids.push(id),
                Err(err) => break err,
            }
        };
        assert_eq!(Error::Watcher(WatcherError::TooMany), err);
        assert_eq!(MAX_WATCHERS, ids.len());
        for id in ids {
            clear_watcher(id).unwrap();
        }
    }

    #[test]
    fn clearing_bad_ids() {
        let _serial = serial();
        assert_eq!(
            Err(Error::Watcher(WatcherError::InvalidId(MAX_WATCHERS))),
            clear_watcher(MAX_WATCHERS)
        );
        let id = add_watcher(|_, _| Ok(())).unwrap();
        clear_watcher(id).unwrap();
        assert_eq!(Err(Error::Watcher(WatcherError::NotSet(id))), clear_watcher(id));
    }
}
