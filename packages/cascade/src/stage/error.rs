//! Error and failure types for promises, futures, and their chains.

use std::{any::Any, fmt};
use thiserror::Error;

/// Error for trying to extract the future from a promise a second time
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("future already retrieved from promise")]
pub struct AlreadyRetrievedError;

/// Error for recording an outcome on a promise that is already satisfied
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("promise already satisfied")]
pub struct AlreadySatisfiedError;

/// Error for fulfilling a promise that is already satisfied
///
/// Gives the rejected value back to the caller.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SetError<T> {
    /// The value that could not be stored
    pub value: T,
}

/// Failure carried by a stage in place of a value
///
/// Recorded when a producer fails its promise, when a producer is dropped
/// before fulfilling, or when a continuation panics. A failure travels
/// forward along the chain without running the user functions of the
/// stages it passes through, and surfaces from [`Future::get`] at the
/// consumer end.
///
/// [`Future::get`]: crate::Future::get
pub enum Failure {
    /// The producer was dropped before fulfilling its promise
    BrokenPromise,
    /// An upstream continuation panicked; the panic payload is retained
    Panicked(Box<dyn Any + Send>),
    /// The producer recorded an error
    Error(anyhow::Error),
}

impl Failure {
    /// The panic payload's message, if this is a [`Failure::Panicked`]
    /// whose payload is a string (which `panic!` with a message produces)
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            Failure::Panicked(payload) => payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
            _ => None,
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::BrokenPromise => f.write_str("BrokenPromise"),
            Failure::Panicked(_) => f
                .debug_tuple("Panicked")
                .field(&self.panic_message().unwrap_or("<non-string payload>"))
                .finish(),
            Failure::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::BrokenPromise => f.write_str("promise was dropped before it was satisfied"),
            Failure::Panicked(_) => match self.panic_message() {
                Some(message) => write!(f, "continuation panicked: {}", message),
                None => f.write_str("continuation panicked"),
            },
            Failure::Error(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Failure::Error(error) => {
                let source: &(dyn std::error::Error + 'static) = error.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Failure::Error(error)
    }
}
