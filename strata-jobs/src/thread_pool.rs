use crate::task::{ExecutionContext, Scheduler, Task};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

// Thread that tries to take tasks out of the run queue and ends when the finish channel is signalled
struct WorkerThread {
    finish_tx: Sender<()>,
    join_handle: JoinHandle<()>,
}

impl WorkerThread {
    fn new(
        scheduler: Scheduler,
        task_rx: Receiver<Arc<Task>>,
        thread_name: String,
    ) -> std::io::Result<Self> {
        let (finish_tx, finish_rx) = crossbeam_channel::bounded(1);
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                profiling::register_thread!(&thread_name);
                loop {
                    crossbeam_channel::select! {
                        recv(task_rx) -> msg => {
                            match msg {
                                Ok(task) => {
                                    task.run();
                                    scheduler.task_finished();
                                }
                                // Every scheduler handle is gone
                                Err(_) => return,
                            }
                        },
                        recv(finish_rx) -> _msg => {
                            return;
                        }
                    }
                }
            })?;

        Ok(WorkerThread {
            finish_tx,
            join_handle,
        })
    }
}

/// Spawns N threads that all pull from one run queue, and stops them when finished or dropped
pub struct ThreadPool {
    worker_threads: Vec<WorkerThread>,
    scheduler: Scheduler,
}

impl ThreadPool {
    /// A `thread_count` of 0 means one thread per logical CPU
    pub fn new(
        name: &str,
        thread_count: usize,
    ) -> std::io::Result<Self> {
        let thread_count = if thread_count == 0 {
            num_cpus::get()
        } else {
            thread_count
        };

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<Arc<Task>>();
        let scheduler = Scheduler::new(name, task_tx);

        let mut worker_threads = Vec::with_capacity(thread_count);
        for thread_index in 0..thread_count {
            let worker = WorkerThread::new(
                scheduler.clone(),
                task_rx.clone(),
                format!("{} {}", name, thread_index),
            )?;
            worker_threads.push(worker);
        }

        log::debug!("Started {} with {} threads", name, thread_count);

        Ok(ThreadPool {
            worker_threads,
            scheduler,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.worker_threads.len()
    }

    pub fn finish(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        for worker_thread in &self.worker_threads {
            // Fails only if the thread already exited
            let _ = worker_thread.finish_tx.send(());
        }

        for worker_thread in self.worker_threads.drain(..) {
            // The last handle to the pool may be dropped by one of its own jobs
            if worker_thread.join_handle.thread().id() == std::thread::current().id() {
                continue;
            }

            if worker_thread.join_handle.join().is_err() {
                log::error!("A worker thread of {} panicked", self.scheduler.name());
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

impl ExecutionContext for ThreadPool {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

/// Single thread that owns all device submission calls
pub struct SubmissionContext {
    thread_pool: ThreadPool,
}

impl SubmissionContext {
    pub fn new() -> std::io::Result<Self> {
        Ok(SubmissionContext {
            thread_pool: ThreadPool::new("Submission", 1)?,
        })
    }

    pub fn finish(self) {
        self.thread_pool.finish();
    }
}

impl ExecutionContext for SubmissionContext {
    fn scheduler(&self) -> &Scheduler {
        self.thread_pool.scheduler()
    }
}
