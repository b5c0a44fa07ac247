use crate::future::{make_ready_future, Future};
use std::pin::Pin;
use std::task::{Context, Poll};
use strata_base::StrataResult;

/// Handle to the result of a spawned task
pub struct Job<T> {
    result: Future<T>,
}

impl<T> Job<T> {
    pub(crate) fn new(result: Future<T>) -> Self {
        Job { result }
    }

    /// A job that already finished with `result`
    pub fn from_result(result: StrataResult<T>) -> Self {
        Job {
            result: make_ready_future(result),
        }
    }

    pub fn is_available(&self) -> bool {
        self.result.is_available()
    }

    /// Blocks the calling thread until the job finishes. Must not be called from a thread of the
    /// context the job runs on.
    pub fn get_result(self) -> StrataResult<T> {
        self.result.get_result()
    }

    pub fn into_result_future(self) -> Future<T> {
        self.result
    }
}

impl<T> std::future::Future for Job<T> {
    type Output = StrataResult<T>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.result).poll(cx)
    }
}

/// Resolves when every job has a result, successful or not
pub async fn until_all_ready<T>(jobs: &mut [Job<T>]) {
    for job in jobs.iter_mut() {
        job.result.when_ready().await;
    }
}

/// All results in order, or the first error in job order
pub async fn until_all_succeed<T>(jobs: Vec<Job<T>>) -> StrataResult<Vec<T>> {
    let mut values = Vec::with_capacity(jobs.len());
    for job in jobs {
        values.push(job.await?);
    }
    Ok(values)
}
