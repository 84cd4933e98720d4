//! Fan-in over several independently settling promises.
//!
//! Each combinator keeps an outstanding count that starts at the number of
//! inputs and drops by one as each input completes, however it completes.
//! The combined promise settles once, when the count reaches zero, from
//! whatever was collected by then. Only the public [`Promise`] callbacks are
//! used.
use crate::{new_failed, new_resolved, AggregateError, Deferred, Failure, Pair, Promise};
use std::{
    any::Any,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// A type-erased resolved value, as produced by [`Promise::erased`].
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// How one input to [`await_all`] settled.
#[derive(Clone)]
pub enum Outcome {
    Resolved(AnyValue),
    Failed(Failure),
}

impl Outcome {
    pub fn value(&self) -> Option<&AnyValue> {
        match self {
            Outcome::Resolved(value) => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Resolved(_) => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Resolved(_) => f.write_str("Resolved(..)"),
            Outcome::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

struct Tally<T> {
    outstanding: usize,
    collected: T,
}

impl<T> Tally<T> {
    fn shared(outstanding: usize, collected: T) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            outstanding,
            collected,
        }))
    }
}

/// Takes the collected data out once the last input has completed.
fn complete_one<T: Default>(tally: &Mutex<Tally<T>>) -> Option<T> {
    let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
    tally.outstanding -= 1;
    (tally.outstanding == 0).then(|| std::mem::take(&mut tally.collected))
}

fn record<T>(tally: &Mutex<Tally<T>>, update: impl FnOnce(&mut T)) {
    update(&mut tally.lock().unwrap_or_else(PoisonError::into_inner).collected)
}

fn settle<V: Send + Sync + 'static>(result: &Deferred<V>, outcome: Result<V, Failure>) {
    let settled = match outcome {
        Ok(value) => result.resolve(value),
        Err(failure) => result.fail(failure),
    };
    if let Err(err) = settled {
        panic!("fan-in result settled out of band: {err}");
    }
}

/// Settles once every input has settled: resolved if none failed, otherwise
/// failed with an [`AggregateError::Void`] holding every failure in the
/// order they happened.
///
/// # Examples
///
/// ```
/// use promise_defer::{await_void, new_pending, State};
///
/// let one = new_pending::<()>();
/// let two = new_pending::<()>();
/// let result = await_void([one.promise(), two.promise()]);
/// one.resolve(()).unwrap();
/// assert_eq!(result.state(), State::Pending);
/// two.resolve(()).unwrap();
/// assert_eq!(result.state(), State::Resolved);
/// ```
pub fn await_void<I>(promises: I) -> Promise<()>
where
    I: IntoIterator<Item = Promise<()>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let total = promises.len();
    if total == 0 {
        return new_resolved(()).promise();
    }
    let result = Deferred::new();
    let tally = Tally::shared(total, Vec::<Failure>::new());
    for promise in &promises {
        let failures = tally.clone();
        promise.on_failure(move |failure| record(&failures, |all| all.push(failure)));
        let (tally, result) = (tally.clone(), result.clone());
        promise.on_completion(move || {
            let Some(failures) = complete_one(&tally) else {
                return;
            };
            debug!(total, failed = failures.len(), "await_void settled");
            let outcome = if failures.is_empty() {
                Ok(())
            } else {
                Err(Arc::new(AggregateError::Void { total, failures }) as Failure)
            };
            settle(&result, outcome);
        });
    }
    result.promise()
}

/// Settles once every input has settled, with one slot per input in input
/// order. Resolves with the values if none failed. Otherwise fails with an
/// [`AggregateError::All`] carrying every slot, successes included.
///
/// Inputs may have different value types; lift each one with
/// [`Promise::erased`].
///
/// # Examples
///
/// ```
/// use promise_defer::{await_all, new_pending};
///
/// let one = new_pending::<String>();
/// let two = new_pending::<u32>();
/// let result = await_all([one.erased(), two.erased()]);
/// two.resolve(2).unwrap();
/// one.resolve("one".into()).unwrap();
/// let values = result.outcome().unwrap().unwrap();
/// assert_eq!(values[0].downcast_ref::<String>().unwrap(), "one");
/// assert_eq!(values[1].downcast_ref::<u32>(), Some(&2));
/// ```
pub fn await_all<I>(promises: I) -> Promise<Vec<AnyValue>>
where
    I: IntoIterator<Item = Promise<AnyValue>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let total = promises.len();
    if total == 0 {
        return new_resolved(vec![]).promise();
    }
    let result = Deferred::new();
    let tally = Tally::shared(total, vec![None::<Outcome>; total]);
    for (index, promise) in promises.iter().enumerate() {
        let slots = tally.clone();
        promise.on_success(move |value| {
            let value = value.clone();
            record(&slots, |all| all[index] = Some(Outcome::Resolved(value)))
        });
        let slots = tally.clone();
        promise.on_failure(move |failure| {
            record(&slots, |all| all[index] = Some(Outcome::Failed(failure)))
        });
        let (tally, result) = (tally.clone(), result.clone());
        promise.on_completion(move || {
            let Some(slots) = complete_one(&tally) else {
                return;
            };
            // Every input has completed, and each fills its slot first.
            let slots: Vec<Outcome> = slots.into_iter().flatten().collect();
            let failed = slots.iter().filter(|slot| slot.failure().is_some()).count();
            debug!(total, failed, "await_all settled");
            let outcome = if failed == 0 {
                Ok(slots.iter().filter_map(Outcome::value).cloned().collect())
            } else {
                Err(Arc::new(AggregateError::All { slots }) as Failure)
            };
            settle(&result, outcome);
        });
    }
    result.promise()
}

/// [`await_all`] over exactly two promises, re-typed as a [`Pair`].
///
/// # Examples
///
/// ```
/// use promise_defer::{await_pair, new_pending};
///
/// let one = new_pending::<String>();
/// let two = new_pending::<String>();
/// let result = await_pair(&one, &two);
/// one.resolve("one".into()).unwrap();
/// two.resolve("two".into()).unwrap();
/// let pair = result.outcome().unwrap().unwrap();
/// assert_eq!(pair.first(), "one");
/// assert_eq!(pair.second(), "two");
/// ```
pub fn await_pair<A, B>(first: &Promise<A>, second: &Promise<B>) -> Promise<Pair<A, B>>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    await_all([first.erased(), second.erased()]).chain(|values| {
        match Pair::try_from(values.as_slice()) {
            Ok(pair) => new_resolved(pair).promise(),
            Err(err) => new_failed(Arc::new(err)).promise(),
        }
    })
}

#[cfg(test)]
mod tests {
use super::*;
use crate::{failure, new_pending, State};
use std::{sync::mpsc, thread};

fn boom() -> Failure {
    failure(std::io::Error::other("boom"))
}

/// Settles `input` on another thread and parks that thread inside the first
/// observer, so the transition has committed but not yet been dispatched.
/// Returns the release signal and the settling thread.
fn park_inside_dispatch<V: Send + Sync + 'static>(
    input: &Deferred<V>,
    settle: impl FnOnce(&Deferred<V>) + Send + 'static,
) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    input.on_completion(move || {
        entered_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });
    let settling = input.clone();
    let handle = thread::spawn(move || settle(&settling));
    entered_rx.recv().unwrap();
    (release_tx, handle)
}

#[test]
fn test_await_void_registered_during_dispatch_sees_failure() {
    let input = new_pending::<()>();
    let (release, settler) = park_inside_dispatch(&input, |input| input.fail(boom()).unwrap());
    assert_eq!(input.state(), State::Failed);
    let result = await_void([input.promise()]);
    assert_eq!(result.state(), State::Pending);

    release.send(()).unwrap();
    settler.join().expect("The settler thread has panicked");
    assert_eq!(result.state(), State::Failed);
}

#[test]
fn test_await_all_registered_during_dispatch_keeps_slots() {
    let failing = new_pending::<String>();
    let resolving = new_pending::<String>();
    let result = await_all([resolving.erased(), failing.erased()]);
    let (release, settler) =
        park_inside_dispatch(&failing, |input| input.fail(boom()).unwrap());
    let late = await_all([failing.erased(), resolving.erased()]);
    resolving.resolve("two".into()).unwrap();
    assert_eq!(late.state(), State::Pending);

    release.send(()).unwrap();
    settler.join().expect("The settler thread has panicked");
    for (promise, failed_index) in [(result, 1), (late, 0)] {
        let err = promise.outcome().unwrap().unwrap_err();
        let Some(AggregateError::All { slots }) = err.downcast_ref::<AggregateError>() else {
            panic!("expected an await_all aggregate, got {err}");
        };
        assert_eq!(slots.len(), 2);
        assert!(slots[failed_index].failure().is_some());
        assert!(slots[1 - failed_index].value().is_some());
    }
}

#[test]
fn test_await_void_input_settled_on_another_thread() {
    for _ in 0..500 {
        let input = new_pending::<()>();
        let failing = input.clone();
        let failer = thread::spawn(move || failing.fail(boom()).unwrap());
        let void = await_void([input.promise()]);
        let all = await_all([input.erased()]);
        failer.join().expect("The failer thread has panicked");
        assert_eq!(void.state(), State::Failed);
        assert_eq!(all.state(), State::Failed);
    }
}

#[test]
fn test_await_void() {
    let one = new_pending::<()>();
    let two = new_pending::<()>();
    let result = await_void([one.promise(), two.promise()]);
    one.resolve(()).unwrap();
    assert_eq!(result.state(), State::Pending);
    two.resolve(()).unwrap();
    assert_eq!(result.state(), State::Resolved);
}

#[test]
fn test_await_void_failure() {
    let one = new_pending::<()>();
    let two = new_pending::<()>();
    let result = await_void([one.promise(), two.promise()]);
    one.resolve(()).unwrap();
    two.fail(boom()).unwrap();
    assert_eq!(result.state(), State::Failed);
}

#[test]
fn test_await_void_collects_in_settlement_order() {
    let inputs: Vec<_> = (0..3).map(|_| new_pending::<()>()).collect();
    let result = await_void(inputs.iter().map(Promise::from));
    inputs[2].fail(failure(std::io::Error::other("third"))).unwrap();
    inputs[1].resolve(()).unwrap();
    assert_eq!(result.state(), State::Pending);
    inputs[0].fail(failure(std::io::Error::other("first"))).unwrap();

    let err = result.outcome().unwrap().unwrap_err();
    match err.downcast_ref::<AggregateError>() {
        Some(AggregateError::Void { total, failures }) => {
            assert_eq!(*total, 3);
            let messages: Vec<_> = failures.iter().map(|f| f.to_string()).collect();
            assert_eq!(messages, vec!["third", "first"]);
        }
        other => panic!("unexpected failure {other:?}"),
    }
}

#[test]
fn test_await_empty() {
    assert_eq!(await_void([]).state(), State::Resolved);
    assert!(await_all([]).outcome().unwrap().unwrap().is_empty());
}

#[test]
fn test_await_all_already_settled_inputs() {
    let one = new_resolved(1u8);
    let two = new_resolved(2u8);
    let result = await_all([one.erased(), two.erased()]);
    let values = result.outcome().unwrap().unwrap();
    assert_eq!(values[0].downcast_ref::<u8>(), Some(&1));
    assert_eq!(values[1].downcast_ref::<u8>(), Some(&2));
}

#[test]
fn test_await_all_failure_keeps_every_slot() {
    let one = new_pending::<String>();
    let two = new_pending::<String>();
    let result = await_all([one.erased(), two.erased()]);
    one.fail(boom()).unwrap();
    assert_eq!(result.state(), State::Pending);
    two.resolve("two".into()).unwrap();

    let err = result.outcome().unwrap().unwrap_err();
    let Some(AggregateError::All { slots }) = err.downcast_ref::<AggregateError>() else {
        panic!("expected an await_all aggregate, got {err}");
    };
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].failure().map(|f| f.to_string()).as_deref(), Some("boom"));
    let second = slots[1].value().and_then(|v| v.downcast_ref::<String>());
    assert_eq!(second.map(String::as_str), Some("two"));
}

#[test]
fn test_await_pair() {
    let one = new_pending::<String>();
    let two = new_pending::<u32>();
    let result = await_pair(&one, &two);
    two.resolve(2).unwrap();
    assert_eq!(result.state(), State::Pending);
    one.resolve("one".into()).unwrap();
    let pair = result.outcome().unwrap().unwrap();
    assert_eq!(*pair, Pair::new(String::from("one"), 2));
}

#[test]
fn test_await_pair_failure() {
    let one = new_pending::<String>();
    let two = new_pending::<String>();
    let result = await_pair(&one, &two);
    one.resolve("one".into()).unwrap();
    two.fail(boom()).unwrap();
    let err = result.outcome().unwrap().unwrap_err();
    assert!(err.downcast_ref::<AggregateError>().is_some());
}
}
