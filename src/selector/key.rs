use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::ops::Ops;
use super::Shared;
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::transport::Endpoint;

pub(crate) struct KeyInner {
    token: usize,
    selector_id: u64,
    selector: Weak<Shared>,
    channel: Channel,
    // Joint reference to the native endpoint: keeps the descriptor alive
    // until the selector has deregistered it, even if the channel closed.
    endpoint: Mutex<Option<Arc<dyn Endpoint>>>,
    interest: AtomicU8,
    ready: AtomicU8,
    valid: AtomicBool,
}

/// Registration of one channel with one selector.
///
/// Keys are cheap handles; clones refer to the same registration.
#[derive(Clone)]
pub struct SelectionKey {
    inner: Arc<KeyInner>,
}

/// Non-owning reference kept by the channel, so channel and key do not
/// keep each other alive.
#[derive(Clone)]
pub(crate) struct WeakKey(Weak<KeyInner>);

impl WeakKey {
    pub(crate) fn upgrade(&self) -> Option<SelectionKey> {
        self.0.upgrade().map(|inner| SelectionKey { inner })
    }

    pub(crate) fn is(&self, key: &SelectionKey) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&key.inner))
    }
}

impl SelectionKey {
    pub(crate) fn new(
        token: usize,
        selector: &Arc<Shared>,
        channel: Channel,
        endpoint: Arc<dyn Endpoint>,
        interest: Ops,
    ) -> Self {
        SelectionKey {
            inner: Arc::new(KeyInner {
                token,
                selector_id: selector.id,
                selector: Arc::downgrade(selector),
                channel,
                endpoint: Mutex::new(Some(endpoint)),
                interest: AtomicU8::new(interest.bits()),
                ready: AtomicU8::new(0),
                valid: AtomicBool::new(true),
            }),
        }
    }

    /// Selector-local identifier of this registration.
    pub fn token(&self) -> usize {
        self.inner.token
    }

    pub fn selector_id(&self) -> u64 {
        self.inner.selector_id
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// A key is valid until it is cancelled or its channel or selector closes.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    pub fn interest_ops(&self) -> Result<Ops> {
        if !self.is_valid() {
            return Err(Error::CancelledKey);
        }
        Ok(self.interest())
    }

    /// Replaces the interest set. Takes effect at the next select; a select
    /// already in progress keeps polling with the old set.
    pub fn set_interest_ops(&self, ops: Ops) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::CancelledKey);
        }
        let valid_ops = self.inner.channel.valid_ops();
        if !valid_ops.contains(ops) {
            return Err(Error::IllegalArgument(format!(
                "{:?} is not a subset of the channel's valid operations {:?}",
                ops, valid_ops
            )));
        }
        self.inner.interest.store(ops.bits(), Ordering::SeqCst);
        if let Some(selector) = self.inner.selector.upgrade() {
            selector.queue_update(self.clone());
        }
        Ok(())
    }

    /// Operations found ready by the last select, restricted to the current
    /// interest set.
    pub fn ready_ops(&self) -> Ops {
        Ops::from_bits_truncate(self.inner.ready.load(Ordering::SeqCst)) & self.interest()
    }

    pub fn is_readable(&self) -> bool {
        self.ready_ops().contains(Ops::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.ready_ops().contains(Ops::WRITE)
    }

    pub fn is_connectable(&self) -> bool {
        self.ready_ops().contains(Ops::CONNECT)
    }

    pub fn is_acceptable(&self) -> bool {
        self.ready_ops().contains(Ops::ACCEPT)
    }

    /// Cancels the registration. The key becomes invalid immediately and is
    /// removed from its selector during the next select.
    pub fn cancel(&self) {
        if self.inner.valid.swap(false, Ordering::SeqCst) {
            if let Some(selector) = self.inner.selector.upgrade() {
                selector.queue_cancel(self.clone());
            }
        }
    }

    pub(crate) fn interest(&self) -> Ops {
        Ops::from_bits_truncate(self.inner.interest.load(Ordering::SeqCst))
    }

    pub(crate) fn set_ready(&self, ops: Ops) {
        self.inner.ready.store(ops.bits(), Ordering::SeqCst);
    }

    pub(crate) fn raw_ready(&self) -> Ops {
        Ops::from_bits_truncate(self.inner.ready.load(Ordering::SeqCst))
    }

    pub(crate) fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
    }

    pub(crate) fn endpoint(&self) -> Option<Arc<dyn Endpoint>> {
        self.inner.endpoint.lock().clone()
    }

    pub(crate) fn release_endpoint(&self) -> Option<Arc<dyn Endpoint>> {
        self.inner.endpoint.lock().take()
    }

    pub(crate) fn downgrade(&self) -> WeakKey {
        WeakKey(Arc::downgrade(&self.inner))
    }
}

impl PartialEq for SelectionKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SelectionKey {}

impl Hash for SelectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.selector_id.hash(state);
        self.inner.token.hash(state);
    }
}

impl fmt::Debug for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionKey")
            .field("token", &self.inner.token)
            .field("selector", &self.inner.selector_id)
            .field("interest", &self.interest())
            .field("ready", &self.raw_ready())
            .field("valid", &self.is_valid())
            .finish()
    }
}
