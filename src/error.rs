// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors raised by the context layer.
//!
//! Map operations return their hasher's own error type instead; see
//! [`KeyHasher`][crate::hash::key::KeyHasher].

use std::fmt;

/// An error from a [`Context`][crate::Context],
/// [`ContextVar`][crate::ContextVar] or watcher operation.
///
/// Every variant carries the `Debug` representation of the object the
/// failing call was about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A value was looked up as the wrong type.
    TypeMismatch {
        /// The type the caller asked for.
        expected: &'static str,
        /// The key whose value had a different type.
        key: String,
    },
    /// A context or token was used out of order.
    ProtocolViolation(ProtocolViolation),
    /// A variable has no value and no default, or a reset tried to
    /// remove a binding that's already gone.
    NotFound {
        /// The variable.
        var: String,
    },
    /// The watcher registry refused a request.
    Watcher(WatcherError),
}

/// Misuse of the enter/exit or set/reset protocols.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The context is already entered somewhere.
    AlreadyEntered(String),
    /// The context being exited was never entered.
    NotEntered(String),
    /// The context being exited isn't the current one.
    ExitMismatch(String),
    /// The token has already been used for a reset.
    TokenUsed(String),
    /// The token belongs to another variable.
    TokenVarMismatch(String),
    /// The token was created in another context.
    TokenContextMismatch(String),
}

/// Failures of [`add_watcher`][crate::context::add_watcher] and
/// [`clear_watcher`][crate::context::clear_watcher].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatcherError {
    /// Every watcher slot is taken.
    TooMany,
    /// The id is out of range.
    InvalidId(usize),
    /// No watcher is registered under the id.
    NotSet(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch { expected, key } => {
                write!(f, "value for {} is not of type {}", key, expected)
            }
            Error::ProtocolViolation(violation) => violation.fmt(f),
            Error::NotFound { var } => write!(f, "{} has no value", var),
            Error::Watcher(err) => err.fmt(f),
        }
    }
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::AlreadyEntered(ctx) => {
                write!(f, "cannot enter context: {} is already entered", ctx)
            }
            ProtocolViolation::NotEntered(ctx) => {
                write!(f, "cannot exit context: {} has not been entered", ctx)
            }
            ProtocolViolation::ExitMismatch(ctx) => write!(
                f,
                "cannot exit context: {} is not the current context of the stack",
                ctx
            ),
            ProtocolViolation::TokenUsed(token) => {
                write!(f, "{} has already been used once", token)
            }
            ProtocolViolation::TokenVarMismatch(token) => {
                write!(f, "{} was created by a different ContextVar", token)
            }
            ProtocolViolation::TokenContextMismatch(token) => {
                write!(f, "{} was created in a different Context", token)
            }
        }
    }
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::TooMany => f.write_str("no more context watcher IDs available"),
            WatcherError::InvalidId(id) => write!(f, "invalid context watcher ID {}", id),
            WatcherError::NotSet(id) => write!(f, "no context watcher set for ID {}", id),
        }
    }
}

impl std::error::Error for Error {}

impl std::error::Error for ProtocolViolation {}

impl std::error::Error for WatcherError {}

impl From<ProtocolViolation> for Error {
    fn from(violation: ProtocolViolation) -> Self {
        Error::ProtocolViolation(violation)
    }
}

impl From<WatcherError> for Error {
    fn from(err: WatcherError) -> Self {
        Error::Watcher(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages_name_the_object() {
        let err = Error::from(ProtocolViolation::TokenUsed("<Token used>".to_string()));
        assert_eq!("<Token used> has already been used once", err.to_string());

        let err = Error::from(WatcherError::NotSet(3));
        assert_eq!("no context watcher set for ID 3", err.to_string());
    }
}
