use crate::future::make_future_promise_pair;
use crate::Job;
use crossbeam_channel::Sender;
use futures::future::BoxFuture;
use futures::task::ArcWake;
use futures::FutureExt;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use strata_base::StrataResult;

thread_local! {
    // Task being polled on this thread
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = RefCell::new(None);
}

/// Handle used to put tasks on an execution context's run queue
#[derive(Clone)]
pub struct Scheduler {
    name: Arc<String>,
    task_tx: Sender<Arc<Task>>,
    active_task_count: Arc<AtomicUsize>,
}

impl Scheduler {
    pub(crate) fn new(
        name: &str,
        task_tx: Sender<Arc<Task>>,
    ) -> Self {
        Scheduler {
            name: Arc::new(name.to_string()),
            task_tx,
            active_task_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks queued on or currently running in this context
    pub fn active_task_count(&self) -> usize {
        self.active_task_count.load(Ordering::Relaxed)
    }

    pub(crate) fn schedule(
        &self,
        task: Arc<Task>,
    ) {
        self.active_task_count.fetch_add(1, Ordering::Release);
        if self.task_tx.send(task).is_err() {
            self.active_task_count.fetch_sub(1, Ordering::Release);
            // The context shut down. Dropping the task breaks its promise.
            log::warn!("Execution context {} is gone, dropping task", self.name);
        }
    }

    pub(crate) fn task_finished(&self) {
        self.active_task_count.fetch_sub(1, Ordering::Release);
    }

    /// Starts `future` as a job on this context. The job's result is whatever the future returns;
    /// if the future panics the job fails with `BrokenPromise`.
    pub fn spawn<T, F>(
        &self,
        name: impl Into<String>,
        future: F,
    ) -> Job<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = StrataResult<T>> + Send + 'static,
    {
        let (result_future, promise) = make_future_promise_pair();
        let body = async move {
            let result = future.await;
            promise.set_result(result);
        };

        let task = Arc::new(Task {
            name: name.into(),
            future: Mutex::new(Some(body.boxed())),
            scheduler: Mutex::new(self.clone()),
        });
        log::trace!("Spawning task {} on {}", task.name, self.name);
        self.schedule(task);
        Job::new(result_future)
    }
}

/// A spawned job. Lives on exactly one execution context at a time and is re-queued there when
/// woken.
pub struct Task {
    name: String,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduler: Mutex<Scheduler>,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let scheduler = arc_self.scheduler.lock().unwrap().clone();
        scheduler.schedule(arc_self.clone());
    }
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polls the task once on the calling thread
    pub(crate) fn run(self: &Arc<Self>) {
        profiling::scope!("Task::run");
        let mut slot = self.future.lock().unwrap();
        let mut future = match slot.take() {
            Some(future) => future,
            // Already finished, this is a stale wake
            None => return,
        };

        let waker = futures::task::waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        CURRENT_TASK.with(|current| *current.borrow_mut() = Some(self.clone()));
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
        CURRENT_TASK.with(|current| *current.borrow_mut() = None);

        match result {
            Ok(Poll::Pending) => *slot = Some(future),
            Ok(Poll::Ready(())) => log::trace!("Task {} finished", self.name),
            Err(_) => {
                // Dropping the future drops the promise, so waiters see BrokenPromise
                log::error!("Task {} panicked", self.name);
            }
        }
    }

    fn set_scheduler(
        &self,
        scheduler: Scheduler,
    ) {
        *self.scheduler.lock().unwrap() = scheduler;
    }
}

/// Moves the current job to another execution context. Always yields once; the job resumes on a
/// thread of the target context.
pub fn reschedule_to<C: ExecutionContext + ?Sized>(context: &C) -> Reschedule {
    Reschedule {
        scheduler: Some(context.scheduler().clone()),
    }
}

pub struct Reschedule {
    scheduler: Option<Scheduler>,
}

impl std::future::Future for Reschedule {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        match self.scheduler.take() {
            Some(scheduler) => {
                CURRENT_TASK.with(|current| match &*current.borrow() {
                    Some(task) => task.set_scheduler(scheduler),
                    None => log::warn!(
                        "reschedule_to({}) awaited outside of a job, resuming in place",
                        scheduler.name()
                    ),
                });
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Something jobs can run on
pub trait ExecutionContext {
    fn scheduler(&self) -> &Scheduler;

    fn spawn<T, F>(
        &self,
        name: impl Into<String>,
        future: F,
    ) -> Job<T>
    where
        Self: Sized,
        T: Send + 'static,
        F: std::future::Future<Output = StrataResult<T>> + Send + 'static,
    {
        self.scheduler().spawn(name, future)
    }

    fn is_idle(&self) -> bool {
        self.scheduler().active_task_count() == 0
    }
}

impl ExecutionContext for Scheduler {
    fn scheduler(&self) -> &Scheduler {
        self
    }
}
