//! Deferred values that settle exactly once.
//!
//! A [`Deferred`] is created pending and later resolved with a value or failed
//! with a [`Failure`]. Its read-only [`Promise`] view is handed to consumers,
//! who register success, failure and completion callbacks. Callbacks that are
//! registered after the fact are replayed immediately.
//!
//! # Examples
//!
//! ```
//! use promise_defer::new_pending;
//! use std::sync::{Arc, Mutex};
//!
//! let deferred = new_pending::<String>();
//! let seen = Arc::new(Mutex::new(None));
//! let slot = seen.clone();
//! deferred
//!     .promise()
//!     .on_success(move |value| *slot.lock().unwrap() = Some(value.clone()));
//! deferred.resolve("🍓".into()).unwrap();
//! assert_eq!(seen.lock().unwrap().as_deref(), Some("🍓"));
//! ```
use std::{fmt, sync::Arc};

pub mod combinators;
pub mod deferred;
pub mod deferreds;
pub mod error;
pub mod pair;
pub mod wait;

pub use combinators::{await_all, await_pair, await_void, AnyValue, Outcome};
pub use deferred::{Deferred, Promise};
pub use deferreds::{fail_all, failure, new_failed, new_pending, new_resolved};
pub use error::{AggregateError, Error};
pub use pair::Pair;
pub use wait::Wait;

/// The opaque payload a deferred fails with. It is shared, never rewritten,
/// as it travels through chained and adopted deferreds.
pub type Failure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Where a deferred is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Resolved,
    Failed,
}

impl State {
    /// `true` once the deferred has left [`State::Pending`].
    pub fn is_settled(self) -> bool {
        self != State::Pending
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "pending",
            State::Resolved => "resolved",
            State::Failed => "failed",
        })
    }
}

/// The type-independent half of a [`Deferred`], so deferreds of different
/// value types can be handled together (see [`fail_all`]).
pub trait Resolvable {
    fn state(&self) -> State;

    /// Fails the deferred. Errors with [`Error::AlreadySettled`] if it has
    /// already left [`State::Pending`].
    fn fail(&self, failure: Failure) -> Result<(), Error>;
}
