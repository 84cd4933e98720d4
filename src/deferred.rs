//! The resolution state machine and its read-only view.
//!
//! A [`Deferred`] owns the right to settle; a [`Promise`] can only watch.
//! Both point at the same shared state, guarded by one mutex. The mutex is
//! held only while the state is read and switched. Observers are always
//! called after it is released, so an observer may freely register on,
//! query, or settle any deferred, including the one that is calling it.
//!
//! Settling does not finish when the state switches. The settling thread
//! keeps a backlog of observers to call and drains it one at a time. Until
//! the backlog is empty, every registration that would otherwise run at once
//! is appended to it instead, so nothing overtakes an observer that was
//! registered earlier.
use crate::{Error, Failure, Resolvable, State};
use std::{
    any::Any,
    collections::VecDeque,
    fmt,
    ops::Deref,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{trace, warn};

type SuccessHandler<V> = Box<dyn FnOnce(Arc<V>) + Send>;
type FailureHandler = Box<dyn FnOnce(Failure) + Send>;
type CompletionHandler = Box<dyn FnOnce() + Send>;
type Call = Box<dyn FnOnce() + Send>;

/// A read-only view of a value that will be settled exactly once.
///
/// Every registration method runs the handler right away if the promise has
/// already settled on the matching channel, and queues it otherwise. While
/// the settling thread is still calling earlier observers, a handler for the
/// settled channel is queued behind them and run by that thread.
pub struct Promise<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

/// The settling side of a [`Promise`]. Clones share the same state.
///
/// # Examples
///
/// ```
/// use promise_defer::{Deferred, State};
///
/// let deferred = Deferred::<u32>::new();
/// let promise = deferred.promise();
/// assert_eq!(promise.state(), State::Pending);
/// deferred.resolve(7).unwrap();
/// assert_eq!(promise.state(), State::Resolved);
/// assert!(deferred.resolve(8).is_err());
/// ```
pub struct Deferred<V> {
    promise: Promise<V>,
}

struct Inner<V> {
    slot: Slot<V>,
    /// `Some` while the settling thread is still calling observers.
    backlog: Option<VecDeque<Call>>,
}

enum Slot<V> {
    Pending(Observers<V>),
    Resolved(Arc<V>),
    Failed(Failure),
}

struct Observers<V> {
    success: Vec<SuccessHandler<V>>,
    failure: Vec<FailureHandler>,
    completion: Vec<CompletionHandler>,
}

impl<V> Default for Observers<V> {
    fn default() -> Self {
        Self {
            success: vec![],
            failure: vec![],
            completion: vec![],
        }
    }
}

impl<V> Observers<V> {
    fn len(&self) -> usize {
        self.success.len() + self.failure.len() + self.completion.len()
    }
}

impl<V> Slot<V> {
    fn state(&self) -> State {
        match self {
            Slot::Pending(_) => State::Pending,
            Slot::Resolved(_) => State::Resolved,
            Slot::Failed(_) => State::Failed,
        }
    }
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Clone for Deferred<V> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("state", &self.state()).finish()
    }
}

impl<V> fmt::Debug for Deferred<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("state", &self.promise.state()).finish()
    }
}

impl<V> Promise<V> {
    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        // Observers never run under the lock, so a poisoned lock still holds
        // a consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> State {
        self.lock().slot.state()
    }

    /// The settled value or failure, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<Arc<V>, Failure>> {
        match &self.lock().slot {
            Slot::Pending(_) => None,
            Slot::Resolved(value) => Some(Ok(value.clone())),
            Slot::Failed(failure) => Some(Err(failure.clone())),
        }
    }

    /// Calls the backlog left by a transition until it is empty. Observers
    /// registered meanwhile were appended to it and run here too.
    fn drain(&self, state: State) {
        let mut first_panic = None;
        loop {
            let mut inner = self.lock();
            let next = inner.backlog.as_mut().and_then(VecDeque::pop_front);
            let Some(call) = next else {
                inner.backlog = None;
                break;
            };
            drop(inner);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
                warn!(%state, "observer panicked, continuing with the rest");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl<V: Send + Sync + 'static> Promise<V> {
    /// Calls `handler` with the value once resolved. Never called on failure.
    pub fn on_success<F>(&self, handler: F)
    where
        F: FnOnce(&V) + Send + 'static,
    {
        self.on_success_shared(move |value| handler(&value))
    }

    /// Like [`on_success`](Self::on_success) but hands over the shared value
    /// itself, so it can be kept past the call.
    pub fn on_success_shared<F>(&self, handler: F)
    where
        F: FnOnce(Arc<V>) + Send + 'static,
    {
        let mut inner = self.lock();
        let value = match &mut inner.slot {
            Slot::Pending(observers) => return observers.success.push(Box::new(handler)),
            Slot::Resolved(value) => value.clone(),
            Slot::Failed(_) => return,
        };
        Self::run_or_queue(inner, move || handler(value));
    }

    /// [`on_success`](Self::on_success) for a handler that ignores the value.
    pub fn on_success_run<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success_shared(move |_| handler())
    }

    /// Calls `handler` with the failure once failed. Never called on success.
    pub fn on_failure<F>(&self, handler: F)
    where
        F: FnOnce(Failure) + Send + 'static,
    {
        let mut inner = self.lock();
        let failure = match &mut inner.slot {
            Slot::Pending(observers) => return observers.failure.push(Box::new(handler)),
            Slot::Resolved(_) => return,
            Slot::Failed(failure) => failure.clone(),
        };
        Self::run_or_queue(inner, move || handler(failure));
    }

    /// [`on_failure`](Self::on_failure) for a handler that ignores the payload.
    pub fn on_failure_run<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_failure(move |_| handler())
    }

    /// Calls `handler` once settled, whichever way. At the transition it runs
    /// after all success or failure handlers.
    pub fn on_completion<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.lock();
        if let Slot::Pending(observers) = &mut inner.slot {
            return observers.completion.push(Box::new(handler));
        }
        Self::run_or_queue(inner, handler);
    }

    /// Runs an observer of a settled promise now, or queues it behind the
    /// transition that is still being dispatched.
    fn run_or_queue<F>(mut inner: MutexGuard<'_, Inner<V>>, call: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(backlog) = &mut inner.backlog {
            return backlog.push_back(Box::new(call));
        }
        drop(inner);
        call();
    }

    /// Sequences another promise after this one.
    ///
    /// Once this resolves, `mapper` is called with the value and the returned
    /// promise takes on whatever the mapper's promise settles to. If this
    /// fails, the returned promise fails with the same payload and `mapper`
    /// is never called.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_defer::{new_pending, State};
    ///
    /// let one = new_pending::<String>();
    /// let two = new_pending::<String>();
    /// let next = two.promise();
    /// let result = one.chain(move |value| {
    ///     assert_eq!(value, "one");
    ///     next
    /// });
    /// two.resolve("two".into()).unwrap();
    /// assert_eq!(result.state(), State::Pending);
    /// one.resolve("one".into()).unwrap();
    /// assert_eq!(result.outcome().unwrap().unwrap().as_str(), "two");
    /// ```
    pub fn chain<K, F>(&self, mapper: F) -> Promise<K>
    where
        K: Send + Sync + 'static,
        F: FnOnce(&V) -> Promise<K> + Send + 'static,
    {
        let result = Deferred::new();
        let target = result.clone();
        self.on_success(move |value| target.adopt(&mapper(value)));
        self.forward_failure(&result);
        result.promise()
    }

    /// [`chain`](Self::chain) for a mapper that ignores the value.
    pub fn chain_after<K, F>(&self, mapper: F) -> Promise<K>
    where
        K: Send + Sync + 'static,
        F: FnOnce() -> Promise<K> + Send + 'static,
    {
        self.chain(move |_| mapper())
    }

    /// Runs `callback` once this resolves, then resolves the returned promise.
    /// A failure skips the callback and is passed on.
    pub fn then_run<F>(&self, callback: F) -> Promise<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let result = Deferred::new();
        let target = result.clone();
        self.on_success_run(move || {
            callback();
            forward(target.resolve(()));
        });
        self.forward_failure(&result);
        result.promise()
    }

    /// Lifts this promise into a type-erased one, the input form
    /// [`await_all`](crate::await_all) takes.
    pub fn erased(&self) -> Promise<crate::AnyValue>
    where
        V: Any,
    {
        let result = Deferred::new();
        let target = result.clone();
        self.on_success_shared(move |value| forward(target.resolve(value as crate::AnyValue)));
        self.forward_failure(&result);
        result.promise()
    }

    /// A future that completes when this promise settles.
    pub fn wait(&self) -> crate::Wait<V> {
        crate::Wait::new(self.clone())
    }

    fn forward_failure<K: Send + Sync + 'static>(&self, target: &Deferred<K>) {
        let target = target.clone();
        self.on_failure(move |failure| forward(target.fail(failure)));
    }
}

/// Settles a deferred that only internal forwarding should ever touch. If the
/// owning program settled it behind our back that is a logic bug, and it is
/// raised through whoever is settling the source.
fn forward(result: Result<(), Error>) {
    if let Err(err) = result {
        panic!("forwarding into a settled deferred: {err}");
    }
}

impl<V> Deferred<V> {
    /// A fresh, pending deferred.
    pub fn new() -> Self {
        Self {
            promise: Promise {
                inner: Arc::new(Mutex::new(Inner {
                    slot: Slot::Pending(Observers::default()),
                    backlog: None,
                })),
            },
        }
    }

    /// The read-only view handed to consumers.
    pub fn promise(&self) -> Promise<V> {
        self.promise.clone()
    }
}

impl<V> Default for Deferred<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Deref for Deferred<V> {
    type Target = Promise<V>;

    fn deref(&self) -> &Self::Target {
        &self.promise
    }
}

impl<V> From<&Deferred<V>> for Promise<V> {
    fn from(deferred: &Deferred<V>) -> Self {
        deferred.promise()
    }
}

impl<V: Send + Sync + 'static> Deferred<V> {
    /// Resolves with `value`, then runs the success handlers and the
    /// completion handlers, each in registration order.
    ///
    /// # Panics
    ///
    /// If a handler panics the remaining handlers still run, and the first
    /// panic is resumed once they have. The deferred stays resolved.
    pub fn resolve(&self, value: V) -> Result<(), Error> {
        self.settle(Slot::Resolved(Arc::new(value)))
    }

    /// Resolves with a value that is already shared.
    pub fn resolve_shared(&self, value: Arc<V>) -> Result<(), Error> {
        self.settle(Slot::Resolved(value))
    }

    /// Fails with `failure`, then runs the failure handlers and the
    /// completion handlers, each in registration order. Handler panics are
    /// treated as in [`resolve`](Self::resolve).
    pub fn fail(&self, failure: Failure) -> Result<(), Error> {
        self.settle(Slot::Failed(failure))
    }

    /// Makes this deferred settle the same way `source` does.
    pub fn adopt(&self, source: &Promise<V>) {
        let target = self.clone();
        source.on_success_shared(move |value| forward(target.resolve_shared(value)));
        source.forward_failure(self);
    }

    fn settle(&self, settled: Slot<V>) -> Result<(), Error> {
        let mut inner = self.promise.lock();
        let current = inner.slot.state();
        if current.is_settled() {
            return Err(Error::AlreadySettled(current));
        }
        let Slot::Pending(observers) = std::mem::replace(&mut inner.slot, settled) else {
            unreachable!()
        };
        let state = inner.slot.state();
        trace!(%state, observers = observers.len(), "deferred settled");

        let mut backlog: VecDeque<Call> = VecDeque::with_capacity(observers.len());
        match &inner.slot {
            Slot::Resolved(value) => {
                for handler in observers.success {
                    let value = value.clone();
                    backlog.push_back(Box::new(move || handler(value)));
                }
            }
            Slot::Failed(failure) => {
                for handler in observers.failure {
                    let failure = failure.clone();
                    backlog.push_back(Box::new(move || handler(failure)));
                }
            }
            Slot::Pending(_) => unreachable!(),
        }
        backlog.extend(observers.completion);
        // Installed in the same critical section as the switch, so a racing
        // registration either lands in the pending lists or behind these.
        inner.backlog = Some(backlog);
        drop(inner);

        self.promise.drain(state);
        Ok(())
    }
}

impl<V: Send + Sync + 'static> Resolvable for Deferred<V> {
    fn state(&self) -> State {
        self.promise.state()
    }

    fn fail(&self, failure: Failure) -> Result<(), Error> {
        Deferred::fail(self, failure)
    }
}
