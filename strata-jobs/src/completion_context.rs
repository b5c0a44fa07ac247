use crate::task::{ExecutionContext, Scheduler, Task};
use crossbeam_channel::{Receiver, Sender};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread::JoinHandle;
use std::time::Duration;

pub type ReadyPredicate = Box<dyn Fn() -> bool + Send>;

#[derive(Default)]
struct WaitState {
    ready: bool,
    waker: Option<Waker>,
}

struct PendingWait {
    predicate: ReadyPredicate,
    state: Arc<Mutex<WaitState>>,
}

impl PendingWait {
    // Returns true once the wait is resolved and can be dropped
    fn check(&self) -> bool {
        if !(self.predicate)() {
            return false;
        }

        let waker = {
            let mut state = self.state.lock().unwrap();
            state.ready = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// One thread that watches readiness predicates (usually device fences) and wakes the jobs
/// waiting on them. Jobs can also be scheduled on it directly.
pub struct CompletionContext {
    scheduler: Scheduler,
    wait_tx: Sender<PendingWait>,
    finish_tx: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl CompletionContext {
    pub fn new(poll_interval: Duration) -> std::io::Result<Self> {
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<Arc<Task>>();
        let (wait_tx, wait_rx) = crossbeam_channel::unbounded::<PendingWait>();
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let scheduler = Scheduler::new("Completion", task_tx);

        let thread_scheduler = scheduler.clone();
        let join_handle = std::thread::Builder::new()
            .name("Completion".into())
            .spawn(move || {
                profiling::register_thread!("Completion");
                completion_thread(thread_scheduler, task_rx, wait_rx, finish_rx, poll_interval)
            })?;

        Ok(CompletionContext {
            scheduler,
            wait_tx,
            finish_tx,
            join_handle: Some(join_handle),
        })
    }

    /// Resolves once `predicate` returns true. The predicate is evaluated on the completion thread.
    pub fn until_ready<P>(
        &self,
        predicate: P,
    ) -> UntilReady
    where
        P: Fn() -> bool + Send + 'static,
    {
        UntilReady {
            wait_tx: self.wait_tx.clone(),
            predicate: Some(Box::new(predicate)),
            state: Arc::new(Mutex::new(WaitState::default())),
        }
    }

    pub fn finish(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            let _ = self.finish_tx.send(());
            if join_handle.thread().id() == std::thread::current().id() {
                return;
            }

            if join_handle.join().is_err() {
                log::error!("Completion thread panicked");
            }
        }
    }
}

impl Drop for CompletionContext {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

impl ExecutionContext for CompletionContext {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

fn completion_thread(
    scheduler: Scheduler,
    task_rx: Receiver<Arc<Task>>,
    wait_rx: Receiver<PendingWait>,
    finish_rx: Receiver<()>,
    poll_interval: Duration,
) {
    let mut waits: Vec<PendingWait> = Vec::new();
    loop {
        // With nothing to watch there is no reason to wake up on a timer
        if waits.is_empty() {
            crossbeam_channel::select! {
                recv(task_rx) -> msg => match msg {
                    Ok(task) => {
                        task.run();
                        scheduler.task_finished();
                    }
                    Err(_) => return,
                },
                recv(wait_rx) -> msg => match msg {
                    Ok(wait) => waits.push(wait),
                    Err(_) => return,
                },
                recv(finish_rx) -> _msg => return,
            }
        } else {
            crossbeam_channel::select! {
                recv(task_rx) -> msg => if let Ok(task) = msg {
                    task.run();
                    scheduler.task_finished();
                },
                recv(wait_rx) -> msg => if let Ok(wait) = msg {
                    waits.push(wait);
                },
                recv(finish_rx) -> _msg => return,
                default(poll_interval) => {},
            }
        }

        profiling::scope!("Check completion predicates");
        waits.retain(|wait| !wait.check());
    }
}

pub struct UntilReady {
    wait_tx: Sender<PendingWait>,
    // Taken when the wait is registered on first poll
    predicate: Option<ReadyPredicate>,
    state: Arc<Mutex<WaitState>>,
}

impl std::future::Future for UntilReady {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        {
            let mut state = self.state.lock().unwrap();
            if state.ready {
                return Poll::Ready(());
            }
            state.waker = Some(cx.waker().clone());
        }

        if let Some(predicate) = self.predicate.take() {
            // Already satisfied, skip the round trip through the completion thread
            if predicate() {
                return Poll::Ready(());
            }

            let wait = PendingWait {
                predicate,
                state: self.state.clone(),
            };
            if let Err(e) = self.wait_tx.send(wait) {
                // Completion thread is gone, fall back to re-checking every time the job is polled
                log::warn!("Completion context is gone, polling the predicate from the job");
                self.predicate = Some(e.into_inner().predicate);
                cx.waker().wake_by_ref();
            }
        }

        Poll::Pending
    }
}
