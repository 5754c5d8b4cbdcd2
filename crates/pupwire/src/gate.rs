//! One command in flight per port.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::NetworkError;

/// Mutual exclusion for the port of a single device.
///
/// Unlike a mutex guard, holding the gate is not tied to a scope: the task
/// that sends a command acquires it, and whoever sees the hub report the port
/// as done releases it, usually the session's read loop. Waiters are served in
/// the order they started waiting.
#[derive(Debug)]
pub struct PortGate {
    semaphore: Semaphore,
    free: AtomicBool,
}

impl PortGate {
    /// A free gate.
    pub fn new() -> Self {
        Self {
            semaphore: Semaphore::new(1),
            free: AtomicBool::new(true),
        }
    }

    /// Wait until the gate is free and take it.
    ///
    /// Fails with [`NetworkError::Disconnected`] once the gate is closed, also
    /// for callers that were already waiting.
    pub async fn acquire(&self) -> Result<(), NetworkError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| NetworkError::Disconnected)?;
        permit.forget();
        self.free.store(false, Ordering::Release);
        trace!("port gate acquired");
        Ok(())
    }

    /// Free the gate and wake the next waiter.
    ///
    /// Returns `false` if the gate was already free; releasing twice never
    /// lets two holders in.
    pub fn release_and_notify(&self) -> bool {
        if self.free.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.semaphore.add_permits(1);
        trace!("port gate released");
        true
    }

    /// Take the gate if nobody holds it, without waiting.
    ///
    /// Used when the port goes away: the gate stays taken until the port is
    /// attached again.
    pub fn clear(&self) -> bool {
        match self.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.free.store(false, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// True if the next [`acquire`](Self::acquire) would not wait.
    pub fn is_free(&self) -> bool {
        self.free.load(Ordering::Acquire) && !self.semaphore.is_closed()
    }

    /// Wake every waiter with [`NetworkError::Disconnected`] and refuse new ones.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl Default for PortGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex, atomic::AtomicUsize};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn at_most_one_holder() {
        let gate = Arc::new(PortGate::new());
        let holders = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let gate = gate.clone();
            let holders = holders.clone();
            tasks.push(tokio::spawn(async move {
                gate.acquire().await.unwrap();
                assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(1)).await;
                holders.fetch_sub(1, Ordering::SeqCst);
                assert!(gate.release_and_notify());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(gate.is_free());
    }

    #[tokio::test]
    async fn waiters_are_served_in_order() {
        let gate = Arc::new(PortGate::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        gate.acquire().await.unwrap();

        let mut tasks = Vec::new();
        for id in 0..3 {
            let gate = gate.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                gate.acquire().await.unwrap();
                order.lock().unwrap().push(id);
                gate.release_and_notify();
            }));
            tokio::task::yield_now().await;
        }

        gate.release_and_notify();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn double_release_admits_one_waiter() {
        let gate = PortGate::new();
        gate.acquire().await.unwrap();
        assert!(!gate.is_free());
        assert!(gate.release_and_notify());
        assert!(!gate.release_and_notify());

        gate.acquire().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(second.is_err(), "a second holder got in");
    }

    #[tokio::test]
    async fn clear_takes_a_free_gate_only() {
        let gate = PortGate::new();
        assert!(gate.clear());
        assert!(!gate.is_free());
        assert!(!gate.clear());
        assert!(gate.release_and_notify());
        assert!(gate.is_free());
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let gate = Arc::new(PortGate::new());
        gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::task::yield_now().await;

        gate.close();
        assert!(matches!(waiter.await.unwrap(), Err(NetworkError::Disconnected)));
        assert!(gate.is_closed());
        assert!(!gate.is_free());
    }
}
