//! Cancellation Token
//!
//! A one-way flag shared by an operation tree. Cancelling runs every
//! registered observer exactly once; observers registered afterwards fire
//! immediately.
//!
//! ```text
//!   root ──cancel()──▶ observers ──▶ child tokens ──▶ their observers
//! ```
//!
//! Child tokens and pending [`CancellationToken::cancelled`] futures hold a
//! keyed registration on their parent and remove it when dropped, so a
//! long-lived root only carries observers for work that is still alive.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

type Observer = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenState {
    cancelled: bool,
    next_key: u64,
    observers: Vec<(u64, Observer)>,
    parent: Option<ParentLink>,
}

/// Remove a registration; the observer is dropped outside the lock
fn deregister(state: &Mutex<TokenState>, key: u64) {
    let removed = {
        let mut state = state.lock();
        let index = state.observers.iter().position(|(k, _)| *k == key);
        index.map(|index| state.observers.remove(index))
    };
    drop(removed);
}

/// A child's registration on its parent, released with the child's state
struct ParentLink {
    parent: Weak<Mutex<TokenState>>,
    key: u64,
}

impl Drop for ParentLink {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.upgrade() {
            deregister(&parent, self.key);
        }
    }
}

/// Registration held by a pending `cancelled()` future
struct Registration<'a> {
    state: &'a Mutex<TokenState>,
    key: Option<u64>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            deregister(self.state, key);
        }
    }
}

/// Shared one-way cancellation flag with observers
///
/// Clones share state. The flag and the observer list sit behind one lock, so
/// registration and cancellation never race.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<Mutex<TokenState>>,
}

impl CancellationToken {
    /// Create an uncancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Observers waiting for this token to be cancelled
    #[must_use]
    pub fn pending_observers(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Cancel the token; calling again is a no-op
    pub fn cancel(&self) {
        let observers = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.observers)
        };
        // Observers run outside the lock so they may touch this token
        for (_, observer) in observers {
            observer();
        }
    }

    /// Run `observer` once the token is cancelled
    ///
    /// Fires immediately, on the calling thread, if already cancelled. The
    /// registration lives as long as the token.
    pub fn on_cancel(&self, observer: impl FnOnce() + Send + 'static) {
        let _ = self.register(Box::new(observer));
    }

    /// Store `observer` under a fresh key, or run it now if already cancelled
    fn register(&self, observer: Observer) -> Option<u64> {
        {
            let mut state = self.state.lock();
            if !state.cancelled {
                let key = state.next_key;
                state.next_key += 1;
                state.observers.push((key, observer));
                return Some(key);
            }
        }
        observer();
        None
    }

    /// Derive a token that is cancelled whenever this one is
    ///
    /// Cancelling the child leaves the parent untouched. Dropping the last
    /// clone of the child removes its observer from the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let weak: Weak<Mutex<TokenState>> = Arc::downgrade(&child.state);
        let key = self.register(Box::new(move || {
            if let Some(state) = weak.upgrade() {
                CancellationToken { state }.cancel();
            }
        }));
        if let Some(key) = key {
            child.state.lock().parent = Some(ParentLink {
                parent: Arc::downgrade(&self.state),
                key,
            });
        }
        child
    }

    /// Wait until the token is cancelled
    ///
    /// Dropping the future before it resolves withdraws its observer.
    pub async fn cancelled(&self) {
        let (tx, rx) = oneshot::channel();
        let _registration = Registration {
            state: &self.state,
            key: self.register(Box::new(move || {
                let _ = tx.send(());
            })),
        };
        let _ = rx.await;
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_observer_fires_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        token.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_follows_parent_not_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());

        // Children of an already-cancelled parent start cancelled
        assert!(parent.child().is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("cancelled() should resolve");
        assert_eq!(token.pending_observers(), 0);
    }

    #[test]
    fn test_dropped_children_release_parent_observers() {
        let root = CancellationToken::new();
        for _ in 0..10_000 {
            let child = root.child();
            let grandchild = child.child();
            drop(grandchild);
            assert_eq!(child.pending_observers(), 0);
        }
        assert_eq!(root.pending_observers(), 0);

        // A live child keeps exactly one registration, and still follows
        let kept = root.child();
        let clone = kept.clone();
        drop(kept);
        assert_eq!(root.pending_observers(), 1);
        root.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_abandoned_cancelled_future_releases_observer() {
        let token = CancellationToken::new();
        for _ in 0..100 {
            let outcome =
                tokio::time::timeout(Duration::from_millis(1), token.cancelled()).await;
            assert!(outcome.is_err());
        }
        assert_eq!(token.pending_observers(), 0);
    }
}
