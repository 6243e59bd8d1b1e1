//! FIFO counting permit pool.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

struct PoolState {
    available: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting permit pool with a FIFO wait queue
///
/// A permit is granted immediately when one is free and nobody is queued;
/// otherwise the caller parks at the back of the queue. Releasing a permit
/// hands it straight to the longest-waiting caller, or returns it to the pool
/// when the queue is empty.
#[derive(Clone)]
pub struct PermitPool {
    state: Arc<Mutex<PoolState>>,
    capacity: usize,
}

impl PermitPool {
    /// Create a pool with `capacity` permits (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Arc::new(Mutex::new(PoolState {
                available: capacity,
                waiters: VecDeque::new(),
            })),
            capacity,
        }
    }

    /// Total permits
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Callers parked in the queue
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Wait for a permit
    pub async fn acquire(&self) -> Permit {
        let rx = {
            let mut state = self.state.lock();
            if state.available > 0 && state.waiters.is_empty() {
                state.available -= 1;
                return self.permit();
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            pool: self.clone(),
            rx: Some(rx),
        };
        waiter.wait().await;
        self.permit()
    }

    fn permit(&self) -> Permit {
        Permit { pool: self.clone() }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(next) = state.waiters.pop_front() {
            // A dropped waiter closed its receiver; skip it
            if next.send(()).is_ok() {
                return;
            }
        }
        state.available += 1;
    }
}

impl std::fmt::Debug for PermitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PermitPool")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Parked caller; returns a permit it was handed but never took
struct Waiter {
    pool: PermitPool,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // The pool never drops a sender without sending
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if rx.try_recv().is_ok() {
            self.pool.release();
        }
    }
}

/// A held permit, returned to the pool on drop
pub struct Permit {
    pool: PermitPool,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}
