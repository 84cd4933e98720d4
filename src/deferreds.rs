//! Constructors for deferreds in each starting state.
use crate::{Deferred, Error, Failure, Resolvable};
use std::sync::Arc;

/// Wraps any error as a [`Failure`] payload.
pub fn failure<E>(err: E) -> Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

pub fn new_pending<V>() -> Deferred<V> {
    Deferred::new()
}

/// A deferred that is already resolved with `value`.
///
/// # Examples
///
/// ```
/// use promise_defer::new_resolved;
/// use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
///
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// new_resolved("string").on_success(move |value| {
///     assert_eq!(*value, "string");
///     flag.store(true, Ordering::SeqCst);
/// });
/// assert!(ran.load(Ordering::SeqCst));
/// ```
pub fn new_resolved<V: Send + Sync + 'static>(value: V) -> Deferred<V> {
    let deferred = Deferred::new();
    deferred.settle_fresh(Ok(value));
    deferred
}

/// A deferred that is already failed with `failure`.
pub fn new_failed<V: Send + Sync + 'static>(failure: Failure) -> Deferred<V> {
    let deferred = Deferred::new();
    deferred.settle_fresh(Err(failure));
    deferred
}

/// Fails every deferred with the same payload.
///
/// Each one is attempted independently. If any had already settled, the
/// first such [`Error`] is returned after the rest have been failed.
pub fn fail_all(failure: Failure, deferreds: &[&dyn Resolvable]) -> Result<(), Error> {
    let mut first = Ok(());
    for deferred in deferreds {
        let result = deferred.fail(failure.clone());
        if first.is_ok() {
            first = result;
        }
    }
    first
}

impl<V: Send + Sync + 'static> Deferred<V> {
    fn settle_fresh(&self, outcome: Result<V, Failure>) {
        let settled = match outcome {
            Ok(value) => self.resolve(value),
            Err(failure) => self.fail(failure),
        };
        // Nobody else holds a fresh deferred and nothing has registered yet.
        debug_assert!(settled.is_ok());
    }
}
