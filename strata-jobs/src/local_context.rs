use crate::task::{ExecutionContext, Scheduler, Task};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Runs jobs on whichever thread calls `update()`, typically the thread that consumes results
pub struct LocalContext {
    scheduler: Scheduler,
    task_rx: Receiver<Arc<Task>>,
}

impl Default for LocalContext {
    fn default() -> Self {
        Self::new("Local")
    }
}

impl LocalContext {
    pub fn new(name: &str) -> Self {
        let (task_tx, task_rx) = crossbeam_channel::unbounded();
        LocalContext {
            scheduler: Scheduler::new(name, task_tx),
            task_rx,
        }
    }

    /// Runs every task queued at the time of the call. Tasks woken while running are left for
    /// the next call. Returns the number of tasks run.
    pub fn update(&self) -> usize {
        profiling::scope!("LocalContext::update");
        let queued = self.task_rx.len();
        let mut run_count = 0;
        while run_count < queued {
            match self.task_rx.try_recv() {
                Ok(task) => {
                    task.run();
                    self.scheduler.task_finished();
                    run_count += 1;
                }
                Err(_) => break,
            }
        }
        run_count
    }
}

impl ExecutionContext for LocalContext {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
