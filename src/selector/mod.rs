//! Readiness multiplexer for rsocket channels.
//!
//! A `Selector` keeps a registration table (token → [`SelectionKey`]) in a
//! lock-free map so that registration and lookup from other threads never
//! wait on a blocked `select`. Everything that touches the native poller
//! (interest changes, cancellations) is queued and applied by the selecting
//! thread at the start of the next select:
//!
//! ```text
//!   register / set_interest_ops ──▶ updates  ─┐
//!   cancel / channel close      ──▶ cancelled ─┤
//!                                             ▼
//!   select: purge cancelled ─▶ re-arm fired ─▶ apply updates ─▶ poll
//!           ─▶ translate readiness into selected keys ─▶ purge cancelled
//! ```
//!
//! The default poller is edge-triggered. Keys that fired are re-armed at the
//! next select, which re-evaluates their readiness, so the selector reports a
//! channel as long as it stays ready.

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use lockfree::map::Map as LockfreeMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::handle::ConnectionHandle;
use crate::interrupt::{self, Blocker, Interruptible};
use crate::provider::ProviderId;

use self::poller::{Interest, Poller, Readiness, Wake, WAKE_TOKEN};

pub mod key;
pub mod ops;
pub mod poller;

pub use key::SelectionKey;
pub use ops::Ops;

static NEXT_SELECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// What the poller currently knows about one token.
struct Armed {
    fd: RawFd,
    interest: Option<Interest>,
}

struct PollState {
    poller: Box<dyn Poller>,
    armed: HashMap<usize, Armed>,
    events: Vec<Readiness>,
    // tokens reported by the last poll
    fired: Vec<usize>,
}

pub(crate) struct Shared {
    pub(crate) id: u64,
    provider: ProviderId,
    poll: Mutex<Option<PollState>>,
    waker: Arc<dyn Wake>,
    table: LockfreeMap<usize, SelectionKey>,
    next_token: AtomicUsize,
    cancelled: Mutex<Vec<SelectionKey>>,
    updates: Mutex<Vec<SelectionKey>>,
    selected: Mutex<Vec<SelectionKey>>,
    wakeup_pending: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn queue_update(&self, key: SelectionKey) {
        let mut updates = self.updates.lock();
        if !updates.contains(&key) {
            updates.push(key);
        }
    }

    pub(crate) fn queue_cancel(&self, key: SelectionKey) {
        self.cancelled.lock().push(key);
    }

    fn wakeup(&self) {
        if !self.wakeup_pending.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.waker.wake() {
                warn!(selector = self.id, error = %e, "failed to wake selector");
            }
        }
    }

    /// Removes a key from the table, the poller and its channel. With
    /// `prune_selected` unset the selected set is left alone.
    fn purge(&self, state: Option<&mut PollState>, key: &SelectionKey, prune_selected: bool) {
        let token = key.token();
        if let Some(state) = state {
            if let Some(armed) = state.armed.remove(&token) {
                if armed.interest.is_some() {
                    if let Err(e) = state.poller.deregister(armed.fd) {
                        warn!(selector = self.id, token, error = %e, "deregister failed");
                    }
                }
            }
        }
        self.table.remove(&token);
        if prune_selected {
            self.selected.lock().retain(|k| k != key);
        }
        key.channel()
            .handle()
            .keys
            .lock()
            .retain(|weak| !weak.is(key));
        // last joint reference: the descriptor may be released here
        key.release_endpoint();
        trace!(selector = self.id, token, "key purged");
    }

    fn purge_cancelled(&self, state: &mut PollState) {
        let cancelled = std::mem::take(&mut *self.cancelled.lock());
        for key in &cancelled {
            self.purge(Some(&mut *state), key, true);
        }
    }

    fn rearm(&self, state: &mut PollState) {
        for token in std::mem::take(&mut state.fired) {
            let Some(armed) = state.armed.get(&token) else {
                continue;
            };
            let Some(interest) = armed.interest else {
                continue;
            };
            if let Err(e) = state.poller.reregister(armed.fd, token, interest) {
                trace!(selector = self.id, token, error = %e, "re-arm failed");
            }
        }
    }

    fn apply_updates(&self, state: &mut PollState) -> Result<()> {
        let mut updates = std::mem::take(&mut *self.updates.lock()).into_iter();
        while let Some(key) = updates.next() {
            if !key.is_valid() {
                continue;
            }
            let Some(endpoint) = key.endpoint() else {
                continue;
            };
            let token = key.token();
            let want = key.interest().poll_interest();
            let armed = state.armed.entry(token).or_insert(Armed {
                fd: endpoint.as_raw_fd(),
                interest: None,
            });

            let applied = match (armed.interest, want) {
                (None, Some(interest)) => state.poller.register(armed.fd, token, interest),
                (Some(_), Some(interest)) => state.poller.reregister(armed.fd, token, interest),
                (Some(_), None) => state.poller.deregister(armed.fd),
                (None, None) => Ok(()),
            };
            if let Err(e) = applied {
                // keep what has not been applied for the next select
                let mut pending = self.updates.lock();
                pending.extend(updates);
                return Err(Error::Io(e));
            }
            armed.interest = want;
        }
        Ok(())
    }

    /// Folds poll results into the selected set; returns the number of keys
    /// whose ready set changed.
    fn translate(&self, state: &mut PollState) -> usize {
        let mut selected = self.selected.lock();
        let mut updated = 0;

        for readiness in &state.events {
            let token = readiness.token();
            if token == WAKE_TOKEN {
                self.wakeup_pending.store(false, Ordering::SeqCst);
                continue;
            }
            state.fired.push(token);

            let Some(entry) = self.table.get(&token) else {
                continue;
            };
            let key = entry.val().clone();
            if !key.is_valid() {
                continue;
            }
            let ready = key.channel().translate_ready(readiness, key.interest());
            if ready.is_empty() {
                continue;
            }

            if selected.contains(&key) {
                let previous = key.raw_ready();
                let merged = previous | ready;
                if merged != previous {
                    key.set_ready(merged);
                    updated += 1;
                }
            } else {
                key.set_ready(ready);
                selected.push(key);
                updated += 1;
            }
        }
        updated
    }
}

impl Interruptible for Shared {
    fn interrupt(&self) {
        self.wakeup();
    }
}

/// Keys selected by the last select operations.
///
/// Holds the selected set locked; drop it before selecting again on the same
/// thread. Closing the selector while holding it is fine: the keys are
/// invalidated and the set reads as empty from the next `selected_keys`.
/// Keys stay selected until removed.
pub struct SelectedKeys<'a> {
    keys: MutexGuard<'a, Vec<SelectionKey>>,
}

impl<'a> SelectedKeys<'a> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SelectionKey> {
        self.keys.iter()
    }

    pub fn contains(&self, key: &SelectionKey) -> bool {
        self.keys.contains(key)
    }

    /// Removes `key`; returns whether it was selected.
    pub fn remove(&mut self, key: &SelectionKey) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k != key);
        self.keys.len() != before
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Takes every selected key, leaving the set empty.
    pub fn drain(mut self) -> Vec<SelectionKey> {
        std::mem::take(&mut *self.keys)
    }
}

impl fmt::Debug for SelectedKeys<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys.iter()).finish()
    }
}

/// Multiplexes readiness of channels from one provider.
pub struct Selector {
    shared: Arc<Shared>,
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.shared.id)
            .field("provider", &self.shared.provider)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Selector {
    pub(crate) fn new(
        provider: ProviderId,
        poller: Box<dyn Poller>,
        waker: Arc<dyn Wake>,
        events_capacity: usize,
    ) -> Self {
        let id = NEXT_SELECTOR_ID.fetch_add(1, Ordering::Relaxed);
        debug!(selector = id, %provider, "selector opened");
        Selector {
            shared: Arc::new(Shared {
                id,
                provider,
                poll: Mutex::new(Some(PollState {
                    poller,
                    armed: HashMap::new(),
                    events: Vec::with_capacity(events_capacity),
                    fired: Vec::new(),
                })),
                waker,
                table: LockfreeMap::new(),
                next_token: AtomicUsize::new(0),
                cancelled: Mutex::new(Vec::new()),
                updates: Mutex::new(Vec::new()),
                selected: Mutex::new(Vec::new()),
                wakeup_pending: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn provider(&self) -> ProviderId {
        self.shared.provider
    }

    pub fn is_open(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ClosedSelector)
        }
    }

    /// Registers `channel` for `ops`.
    ///
    /// A channel already registered here gets its interest set replaced and
    /// the existing key is returned. The new interest set takes effect at the
    /// next select.
    pub fn register(&self, channel: impl Into<Channel>, ops: Ops) -> Result<SelectionKey> {
        let channel = channel.into();
        self.ensure_open()?;

        let provider = channel.provider_id();
        if provider != self.shared.provider {
            return Err(Error::ProviderMismatch {
                channel: provider,
                selector: self.shared.provider,
            });
        }
        let valid_ops = channel.valid_ops();
        if !valid_ops.contains(ops) {
            return Err(Error::IllegalArgument(format!(
                "{:?} is not a subset of the channel's valid operations {:?}",
                ops, valid_ops
            )));
        }

        let handle = channel.handle().clone();
        let mut keys = handle.keys.lock();
        if !handle.is_open() {
            return Err(Error::ClosedChannel);
        }
        if handle.is_blocking() {
            return Err(Error::IllegalBlockingMode(
                "a channel must be non-blocking to be registered",
            ));
        }

        keys.retain(|weak| weak.upgrade().is_some());
        let existing = keys
            .iter()
            .filter_map(|weak| weak.upgrade())
            .find(|key| key.selector_id() == self.shared.id);
        if let Some(key) = existing {
            key.set_interest_ops(ops)?;
            return Ok(key);
        }

        let endpoint = handle.endpoint()?;
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let key = SelectionKey::new(token, &self.shared, channel, endpoint, ops);
        self.shared.table.insert(token, key.clone());
        self.shared.queue_update(key.clone());
        keys.push(key.downgrade());
        debug!(selector = self.shared.id, handle = handle.id(), token, ?ops, "registered");
        Ok(key)
    }

    pub(crate) fn key_for(&self, handle: &ConnectionHandle) -> Option<SelectionKey> {
        handle
            .keys
            .lock()
            .iter()
            .filter_map(|weak| weak.upgrade())
            .find(|key| key.selector_id() == self.shared.id)
    }

    /// Snapshot of every registered key, including cancelled keys that have
    /// not been purged yet.
    pub fn keys(&self) -> Result<Vec<SelectionKey>> {
        self.ensure_open()?;
        Ok(self
            .shared
            .table
            .iter()
            .map(|entry| entry.val().clone())
            .collect())
    }

    pub fn selected_keys(&self) -> SelectedKeys<'_> {
        let mut keys = self.shared.selected.lock();
        if self.shared.closed.load(Ordering::SeqCst) {
            keys.clear();
        }
        SelectedKeys { keys }
    }

    /// Blocks until at least one channel is selected, `wakeup` is called, the
    /// thread is interrupted, or the selector is closed.
    pub fn select(&self) -> Result<usize> {
        self.do_select(None)
    }

    /// Like `select`, bounded by `timeout`. A zero timeout does not block.
    pub fn select_timeout(&self, timeout: Duration) -> Result<usize> {
        self.do_select(Some(timeout))
    }

    pub fn select_now(&self) -> Result<usize> {
        self.do_select(Some(Duration::ZERO))
    }

    fn do_select(&self, timeout: Option<Duration>) -> Result<usize> {
        self.ensure_open()?;
        let shared = &*self.shared;
        let mut guard = shared
            .poll
            .try_lock()
            .ok_or(Error::IllegalState("another thread is selecting"))?;
        let state = guard.as_mut().ok_or(Error::ClosedSelector)?;

        shared.purge_cancelled(state);
        shared.rearm(state);
        shared.apply_updates(state)?;

        let blocking = timeout != Some(Duration::ZERO);
        let blocker = if blocking {
            let weak: Weak<dyn Interruptible> = Arc::downgrade(&self.shared) as Weak<dyn Interruptible>;
            Some(Blocker::enter(weak))
        } else {
            None
        };
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match state.poller.poll(&mut state.events, remaining) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    if interrupt::is_interrupted() {
                        state.events.clear();
                        break;
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        drop(blocker);

        if !self.is_open() {
            return Ok(0);
        }

        let updated = shared.translate(state);
        shared.purge_cancelled(state);
        trace!(selector = shared.id, events = state.events.len(), updated, "select");
        Ok(updated)
    }

    /// Makes a blocked select return, or the next one if none is in
    /// progress. Calls between two selects coalesce.
    pub fn wakeup(&self) {
        self.shared.wakeup();
    }

    /// Closes the selector. Keys are invalidated, the native poller is
    /// released, and a thread blocked in select returns with no keys.
    pub fn close(&self) {
        let shared = &*self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = shared.waker.wake() {
            warn!(selector = shared.id, error = %e, "failed to wake selector on close");
        }

        let mut guard = shared.poll.lock();
        let mut state = guard.take();
        let keys: Vec<SelectionKey> = shared.table.iter().map(|entry| entry.val().clone()).collect();
        for key in &keys {
            key.invalidate();
            shared.purge(state.as_mut(), key, false);
        }
        shared.cancelled.lock().clear();
        shared.updates.lock().clear();
        // the closing thread may be iterating the selected set; selected_keys
        // clears it on next access otherwise
        if let Some(mut selected) = shared.selected.try_lock() {
            selected.clear();
        }
        drop(state);
        debug!(selector = shared.id, keys = keys.len(), "selector closed");
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        self.close();
    }
}
