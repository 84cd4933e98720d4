use crate::{Failure, Promise};
use std::sync::{Arc, Mutex, PoisonError};
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

/// A `Future` over a [`Promise`], for callers that would rather `.await` than
/// register callbacks. Any number of `Wait`s may exist for one promise; they
/// all complete with the same shared outcome.
///
/// # Examples
///
/// ```
/// use promise_defer::new_pending;
/// use futures::executor::block_on;
/// use std::thread;
/// let deferred = new_pending::<String>();
/// let waiting = deferred.wait();
///
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", waiting.await);
/// }));
/// deferred.resolve("Hi".into()).unwrap();
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Wait<V> {
    promise: Promise<V>,
    wakers: Arc<Mutex<Wakers>>,
}

#[derive(Debug, Default)]
struct Wakers {
    settled: bool,
    waiting: Vec<Waker>,
}

impl<V: Send + Sync + 'static> Wait<V> {
    pub(crate) fn new(promise: Promise<V>) -> Self {
        let wakers = Arc::new(Mutex::new(Wakers::default()));
        let on_settled = wakers.clone();
        promise.on_completion(move || {
            let mut wakers = on_settled.lock().unwrap_or_else(PoisonError::into_inner);
            wakers.settled = true;
            for waker in wakers.waiting.drain(..) {
                waker.wake()
            }
        });
        Self { promise, wakers }
    }
}

impl<V> Future for Wait<V> {
    type Output = Result<Arc<V>, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        if wakers.settled {
            if let Some(outcome) = self.promise.outcome() {
                return Poll::Ready(outcome);
            }
        }
        if !wakers.waiting.iter().any(|waker| waker.will_wake(cx.waker())) {
            wakers.waiting.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
