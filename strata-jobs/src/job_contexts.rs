use crate::{CompletionContext, LocalContext, SubmissionContext, ThreadPool};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    // 0 = one per logical CPU
    pub worker_threads: usize,
    pub completion_poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            worker_threads: 0,
            completion_poll_interval_ms: 1,
        }
    }
}

/// The set of execution contexts the pipeline and the loader run on
pub struct JobContexts {
    pub thread_pool: ThreadPool,
    pub submission: SubmissionContext,
    pub completion: CompletionContext,
    pub local: LocalContext,
}

impl JobContexts {
    pub fn new(config: &JobsConfig) -> std::io::Result<Self> {
        log::info!(
            "Starting job contexts ({} worker threads)",
            if config.worker_threads == 0 {
                num_cpus::get()
            } else {
                config.worker_threads
            }
        );

        Ok(JobContexts {
            thread_pool: ThreadPool::new("Worker", config.worker_threads)?,
            submission: SubmissionContext::new()?,
            completion: CompletionContext::new(Duration::from_millis(
                config.completion_poll_interval_ms,
            ))?,
            local: LocalContext::default(),
        })
    }

    pub fn finish(self) {
        self.thread_pool.finish();
        self.submission.finish();
        self.completion.finish();
    }
}
