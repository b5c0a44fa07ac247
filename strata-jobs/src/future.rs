use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use strata_base::{StrataError, StrataResult};

struct SharedState<T> {
    resolved: bool,
    result: Option<StrataResult<T>>,
    waker: Option<Waker>,
}

struct Shared<T> {
    state: Mutex<SharedState<T>>,
    condvar: Condvar,
}

impl<T> Shared<T> {
    fn resolve(
        &self,
        result: StrataResult<T>,
    ) {
        let waker = {
            let mut state = self.state.lock().unwrap();
            assert!(!state.resolved, "A promise was resolved more than once");
            state.resolved = true;
            state.result = Some(result);
            state.waker.take()
        };

        self.condvar.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn poll_resolved(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        let mut state = self.state.lock().unwrap();
        if state.resolved {
            Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    fn take_result(state: &mut SharedState<T>) -> StrataResult<T> {
        // A consumed result can only be observed through a misused WhenReady
        state.result.take().unwrap_or(Err(StrataError::BrokenPromise))
    }
}

/// Write side of a one-shot channel. Dropping it without calling `set_result` resolves the
/// matching [`Future`] with `StrataError::BrokenPromise`.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn set_result(
        mut self,
        result: StrataResult<T>,
    ) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(StrataError::BrokenPromise));
        }
    }
}

/// Read side of a one-shot channel. Can be waited on from a plain thread with `get_result` or
/// awaited from a job.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Future<T> {
    pub fn is_available(&self) -> bool {
        self.shared.state.lock().unwrap().resolved
    }

    /// Blocks the calling thread until the promise is resolved
    pub fn get_result(self) -> StrataResult<T> {
        let mut state = self.shared.state.lock().unwrap();
        while !state.resolved {
            state = self.shared.condvar.wait(state).unwrap();
        }
        Shared::take_result(&mut state)
    }

    /// Resolves once a result is available without taking it
    pub fn when_ready(&mut self) -> WhenReady<'_, T> {
        WhenReady {
            shared: &self.shared,
        }
    }
}

impl<T> std::future::Future for Future<T> {
    type Output = StrataResult<T>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        match self.shared.poll_resolved(cx) {
            Poll::Ready(()) => {
                let mut state = self.shared.state.lock().unwrap();
                Poll::Ready(Shared::take_result(&mut state))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct WhenReady<'a, T> {
    shared: &'a Shared<T>,
}

impl<'a, T> std::future::Future for WhenReady<'a, T> {
    type Output = ();

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        self.shared.poll_resolved(cx)
    }
}

pub fn make_future_promise_pair<T>() -> (Future<T>, Promise<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SharedState {
            resolved: false,
            result: None,
            waker: None,
        }),
        condvar: Condvar::new(),
    });

    (
        Future {
            shared: shared.clone(),
        },
        Promise {
            shared: Some(shared),
        },
    )
}

/// A future that is already resolved
pub fn make_ready_future<T>(result: StrataResult<T>) -> Future<T> {
    let (future, promise) = make_future_promise_pair();
    promise.set_result(result);
    future
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn result_crosses_threads() {
        let (future, promise) = make_future_promise_pair::<u32>();
        assert!(!future.is_available());

        let thread = std::thread::spawn(move || promise.set_result(Ok(42)));
        assert_eq!(future.get_result().unwrap(), 42);
        thread.join().unwrap();
    }

    #[test]
    fn dropped_promise_is_broken() {
        let (future, promise) = make_future_promise_pair::<u32>();
        drop(promise);
        assert!(future.is_available());
        assert!(matches!(future.get_result(), Err(StrataError::BrokenPromise)));
    }

    #[test]
    fn errors_are_delivered() {
        let future = make_ready_future::<()>(Err(StrataError::ParseError("bad".into())));
        assert!(matches!(future.get_result(), Err(StrataError::ParseError(_))));
    }

    #[test]
    fn awaiting_wakes_on_resolve() {
        let (future, promise) = make_future_promise_pair::<&'static str>();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            promise.set_result(Ok("done"));
        });

        assert_eq!(futures::executor::block_on(future).unwrap(), "done");
        thread.join().unwrap();
    }
}
