//! Per-thread interrupt status.
//!
//! Threads blocked in a channel operation can be released by another thread
//! through an [`InterruptHandle`]. Interrupting a thread blocked on a channel
//! closes that channel and the blocked call fails with
//! [`Error::ClosedByInterrupt`](crate::Error::ClosedByInterrupt). Interrupting
//! a thread blocked in `Selector::select` wakes the selector. The status stays
//! set until [`interrupted`] clears it, and a blocking call entered while the
//! status is set fails immediately.
//!
//! ```rust,no_run
//! use mill_rdma::interrupt;
//! use std::thread;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let worker = thread::spawn(move || {
//!     tx.send(interrupt::current()).unwrap();
//!     // ... blocking channel operations ...
//! });
//! rx.recv().unwrap().interrupt();
//! worker.join().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a blocked thread is waiting on that an interrupt must release.
pub(crate) trait Interruptible: Send + Sync {
    fn interrupt(&self);
}

#[derive(Default)]
struct ThreadState {
    interrupted: AtomicBool,
    blocker: Mutex<Option<Weak<dyn Interruptible>>>,
}

thread_local! {
    static CURRENT: Arc<ThreadState> = Arc::new(ThreadState::default());
}

/// Handle for interrupting one thread from another.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<ThreadState>,
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

impl InterruptHandle {
    /// Sets the thread's interrupt status and releases whatever it is blocked on.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);
        let blocker = self.state.blocker.lock().clone();
        if let Some(target) = blocker.and_then(|weak| weak.upgrade()) {
            target.interrupt();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }
}

/// Handle for the calling thread.
pub fn current() -> InterruptHandle {
    InterruptHandle {
        state: CURRENT.with(Arc::clone),
    }
}

/// Whether the calling thread's interrupt status is set.
pub fn is_interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.load(Ordering::SeqCst))
}

/// Tests and clears the calling thread's interrupt status.
pub fn interrupted() -> bool {
    CURRENT.with(|state| state.interrupted.swap(false, Ordering::SeqCst))
}

/// Marks the calling thread as blocked on `target` until dropped.
pub(crate) struct Blocker {
    state: Arc<ThreadState>,
}

impl Blocker {
    /// If the thread is already interrupted, `target` is interrupted right away.
    pub(crate) fn enter(target: Weak<dyn Interruptible>) -> Self {
        let state = CURRENT.with(Arc::clone);
        *state.blocker.lock() = Some(target.clone());
        if state.interrupted.load(Ordering::SeqCst) {
            if let Some(target) = target.upgrade() {
                target.interrupt();
            }
        }
        Blocker { state }
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        *self.state.blocker.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Counter(AtomicUsize);

    impl Interruptible for Counter {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_interrupted_clears_status() {
        current().interrupt();
        assert!(is_interrupted());
        assert!(interrupted());
        assert!(!interrupted());
    }

    #[test]
    fn test_interrupt_reaches_blocker() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn Interruptible> = Arc::downgrade(&target) as Weak<dyn Interruptible>;

        let handle = current();
        let blocker = Blocker::enter(weak);
        handle.interrupt();
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        drop(blocker);
        handle.interrupt();
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
        interrupted();
    }

    #[test]
    fn test_enter_while_interrupted() {
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let weak: Weak<dyn Interruptible> = Arc::downgrade(&target) as Weak<dyn Interruptible>;

        current().interrupt();
        let _blocker = Blocker::enter(weak);
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
        interrupted();
    }

    #[test]
    fn test_status_is_per_thread() {
        current().interrupt();
        let other = thread::spawn(is_interrupted).join().unwrap();
        assert!(!other);
        interrupted();
    }
}
