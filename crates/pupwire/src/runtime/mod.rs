use std::future::Future;

mod tokio_runtime;

/// A runtime abstraction allowing you to use any runtime for pupwire
pub trait Runtime: 'static + Send + Sync {
    /// Associated handle for aborting a spawned task
    type JoinHandle: JoinHandle;

    /// Spawn a new task
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> Self::JoinHandle;
}

/// A spawned task that can be stopped early
pub trait JoinHandle: 'static + Send + Sync {
    /// Stop the task. Calling this on a finished task does nothing.
    fn abort(&mut self);

    /// True once the task ran to completion or was aborted.
    fn is_finished(&self) -> bool;
}

pub(crate) fn run_async<F, RT>(task: F, runtime: &RT) -> RT::JoinHandle
where
    F: Future<Output = ()> + Send + 'static,
    RT: Runtime,
{
    runtime.spawn(task)
}
