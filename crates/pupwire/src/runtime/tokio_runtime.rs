use crate::Runtime;
use std::future::Future;

use super::JoinHandle;

impl Runtime for tokio::runtime::Handle {
    type JoinHandle = tokio::task::JoinHandle<()>;

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) -> Self::JoinHandle {
        tracing::trace!("[Handle::spawn] Spawning task");
        tokio::runtime::Handle::spawn(self, task)
    }
}

impl JoinHandle for tokio::task::JoinHandle<()> {
    fn abort(&mut self) {
        tokio::task::JoinHandle::abort(self);
    }

    fn is_finished(&self) -> bool {
        tokio::task::JoinHandle::is_finished(self)
    }
}
