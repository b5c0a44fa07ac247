//! Cooperative jobs on a small set of execution contexts. A job is a Rust future that is polled
//! by whichever context it currently lives on; it can move between contexts with
//! [`reschedule_to`] and park on a device fence with [`CompletionContext::until_ready`].

mod future;
pub use future::{make_future_promise_pair, make_ready_future, Future, Promise, WhenReady};

mod task;
pub use task::{reschedule_to, ExecutionContext, Reschedule, Scheduler, Task};

mod job;
pub use job::{until_all_ready, until_all_succeed, Job};

mod thread_pool;
pub use thread_pool::{SubmissionContext, ThreadPool};

mod local_context;
pub use local_context::LocalContext;

mod completion_context;
pub use completion_context::{CompletionContext, ReadyPredicate, UntilReady};

mod job_contexts;
pub use job_contexts::{JobContexts, JobsConfig};
