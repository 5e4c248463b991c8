//! Connection handles.
//!
//! A `ConnectionHandle` exclusively owns one native endpoint and drives its
//! lifecycle:
//!
//! ```text
//!   Unbound ──bind──▶ Bound ──connect──▶ Connecting ──finish_connect──▶ Connected
//!      │                │                    │                              │
//!      └────────────────┴──────close─────────┴──────────────────────────────┴──▶ Closed
//! ```
//!
//! Endpoints are non-blocking at the native level. Blocking mode is layered
//! on top by parking the calling thread on the descriptor together with a
//! close signal, which is what lets another thread (or an interrupt) release
//! a blocked call by closing the handle.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::family::ProtocolFamily;
use crate::interrupt::{self, Blocker, Interruptible};
use crate::options::{self, OptionValue, Role, SocketOption};
use crate::park::CloseSignal;
use crate::selector::key::WeakKey;
use crate::transport::{Endpoint, Transport, Wait};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Unbound = 0,
    Bound = 1,
    Connecting = 2,
    Connected = 3,
    Closed = 4,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Unbound,
            1 => State::Bound,
            2 => State::Connecting,
            3 => State::Connected,
            _ => State::Closed,
        }
    }
}

/// Result of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes transferred. Zero only in non-blocking mode when nothing is
    /// available, or for an empty buffer.
    Bytes(usize),
    /// The peer shut down its side of the connection.
    EndOfStream,
}

impl ReadOutcome {
    /// Bytes transferred, treating end-of-stream as zero.
    pub fn bytes(&self) -> usize {
        match self {
            ReadOutcome::Bytes(n) => *n,
            ReadOutcome::EndOfStream => 0,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

pub struct ConnectionHandle {
    id: u64,
    family: ProtocolFamily,
    role: Role,
    state: AtomicU8,
    blocking: AtomicBool,
    endpoint: Mutex<Option<Arc<dyn Endpoint>>>,
    // Serializes bind/connect/listen transitions; never held while parked.
    state_lock: Mutex<()>,
    signal: Mutex<Option<Arc<CloseSignal>>>,
    // Also the registration lock: register and set_blocking hold it.
    pub(crate) keys: Mutex<Vec<WeakKey>>,
    input_shut: AtomicBool,
    output_shut: AtomicBool,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

impl ConnectionHandle {
    fn with_endpoint(
        endpoint: Arc<dyn Endpoint>,
        family: ProtocolFamily,
        role: Role,
        state: State,
    ) -> Arc<Self> {
        Arc::new(ConnectionHandle {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            family,
            role,
            state: AtomicU8::new(state as u8),
            blocking: AtomicBool::new(true),
            endpoint: Mutex::new(Some(endpoint)),
            state_lock: Mutex::new(()),
            signal: Mutex::new(None),
            keys: Mutex::new(Vec::new()),
            input_shut: AtomicBool::new(false),
            output_shut: AtomicBool::new(false),
        })
    }

    /// Opens a new unbound endpoint on `transport`.
    pub(crate) fn open(
        transport: &dyn Transport,
        family: ProtocolFamily,
        role: Role,
    ) -> Result<Arc<Self>> {
        let endpoint: Arc<dyn Endpoint> = Arc::from(transport.open(family)?);
        let handle = Self::with_endpoint(endpoint, family, role, State::Unbound);
        debug!(handle = handle.id, %family, ?role, transport = transport.name(), "opened");
        Ok(handle)
    }

    /// Wraps an endpoint produced by `accept`.
    pub(crate) fn accepted(endpoint: Box<dyn Endpoint>, family: ProtocolFamily) -> Arc<Self> {
        Self::with_endpoint(Arc::from(endpoint), family, Role::Socket, State::Connected)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state() != State::Closed
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking.load(Ordering::SeqCst)
    }

    /// Switches blocking mode. A handle with a valid selection key must stay
    /// non-blocking.
    pub fn set_blocking(&self, block: bool) -> Result<()> {
        let keys = self.keys.lock();
        if !self.is_open() {
            return Err(Error::ClosedChannel);
        }
        if block
            && keys
                .iter()
                .filter_map(WeakKey::upgrade)
                .any(|key| key.is_valid())
        {
            return Err(Error::IllegalBlockingMode(
                "channel is registered with a selector",
            ));
        }
        self.blocking.store(block, Ordering::SeqCst);
        Ok(())
    }

    /// Whether any selector holds a valid key for this handle.
    pub fn is_registered(&self) -> bool {
        self.keys
            .lock()
            .iter()
            .filter_map(WeakKey::upgrade)
            .any(|key| key.is_valid())
    }

    pub(crate) fn endpoint(&self) -> Result<Arc<dyn Endpoint>> {
        self.endpoint.lock().clone().ok_or(Error::ClosedChannel)
    }

    fn transition(&self, from: State, to: State) -> Result<()> {
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(current) if State::from_u8(current) == State::Closed => Err(self.cancelled()),
            Err(_) => Err(Error::IllegalState("concurrent state change")),
        }
    }

    /// Error for an operation that found the handle closed under it.
    fn cancelled(&self) -> Error {
        if interrupt::is_interrupted() {
            Error::ClosedByInterrupt
        } else {
            Error::AsynchronousClose
        }
    }

    fn failure(&self, err: io::Error) -> Error {
        if self.is_open() {
            Error::Io(err)
        } else {
            self.cancelled()
        }
    }

    fn blocker(self: &Arc<Self>, blocking: bool) -> Option<Blocker> {
        if blocking {
            let weak: Weak<dyn Interruptible> = Arc::downgrade(self) as Weak<dyn Interruptible>;
            Some(Blocker::enter(weak))
        } else {
            None
        }
    }

    fn close_signal(&self) -> Result<Arc<CloseSignal>> {
        let mut slot = self.signal.lock();
        if let Some(signal) = slot.as_ref() {
            return Ok(signal.clone());
        }
        let signal = Arc::new(CloseSignal::new()?);
        *slot = Some(signal.clone());
        Ok(signal)
    }

    /// Parks until the endpoint is ready for `wait`. `Ok(false)` on timeout.
    fn park(&self, endpoint: &dyn Endpoint, wait: Wait, deadline: Option<Instant>) -> Result<bool> {
        let signal = self.close_signal()?;
        // close() sets the state before it looks for a signal to fire
        if !self.is_open() {
            return Err(self.cancelled());
        }
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let ready = endpoint.park(wait, signal.fd(), timeout)?;
        if !self.is_open() {
            return Err(self.cancelled());
        }
        Ok(ready)
    }

    /// Binds to `addr`, or to the wildcard address of the family.
    pub fn bind(&self, addr: Option<SocketAddr>) -> Result<SocketAddr> {
        self.bind_with(addr, None)
    }

    /// Binds and, for server sockets, starts listening with `backlog`.
    pub(crate) fn bind_with(&self, addr: Option<SocketAddr>, backlog: Option<u32>) -> Result<SocketAddr> {
        let addr = match addr {
            Some(addr) => {
                self.family.check(&addr)?;
                addr
            }
            None => self.family.wildcard().ok_or_else(|| {
                Error::UnsupportedOperation(format!("no wildcard address for {}", self.family))
            })?,
        };

        let _guard = self.state_lock.lock();
        let endpoint = self.endpoint()?;
        match self.state() {
            State::Unbound => {}
            State::Bound => return Err(Error::AlreadyBound),
            State::Connecting => return Err(Error::ConnectionPending),
            State::Connected => return Err(Error::AlreadyConnected),
            State::Closed => return Err(Error::ClosedChannel),
        }

        endpoint.bind(addr)?;
        if let Some(backlog) = backlog {
            // bound but not listening cannot be retried or used; give it up
            if let Err(e) = endpoint.listen(backlog) {
                debug!(handle = self.id, %addr, error = %e, "listen failed");
                let err = self.failure(e);
                self.close();
                return Err(err);
            }
        }
        self.transition(State::Unbound, State::Bound)?;

        let local = endpoint.local_addr()?.unwrap_or(addr);
        debug!(handle = self.id, %local, listening = backlog.is_some(), "bound");
        Ok(local)
    }

    /// Starts connecting to `addr`.
    ///
    /// Returns `true` if the connection was established, which is always the
    /// case in blocking mode. In non-blocking mode `false` means the
    /// connection is pending and must be completed with `finish_connect`.
    pub fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<bool> {
        self.connect_until(addr, None)
    }

    pub(crate) fn connect_until(self: &Arc<Self>, addr: SocketAddr, deadline: Option<Instant>) -> Result<bool> {
        self.family.check(&addr)?;
        let target = self.family.connect_target(addr);

        {
            let _guard = self.state_lock.lock();
            let endpoint = self.endpoint()?;
            match self.state() {
                State::Unbound => {
                    let wildcard = self.family.wildcard().ok_or_else(|| {
                        Error::UnsupportedOperation(format!("cannot bind a {} handle", self.family))
                    })?;
                    endpoint.bind(wildcard)?;
                    self.transition(State::Unbound, State::Bound)?;
                }
                State::Bound => {}
                State::Connecting => return Err(Error::ConnectionPending),
                State::Connected => return Err(Error::AlreadyConnected),
                State::Closed => return Err(Error::ClosedChannel),
            }

            match endpoint.connect(target) {
                Ok(true) => {
                    self.transition(State::Bound, State::Connected)?;
                    debug!(handle = self.id, peer = %target, "connected");
                    return Ok(true);
                }
                Ok(false) => {
                    self.transition(State::Bound, State::Connecting)?;
                    trace!(handle = self.id, peer = %target, "connection pending");
                }
                Err(e) => {
                    debug!(handle = self.id, peer = %target, error = %e, "connect failed");
                    let err = self.failure(e);
                    self.close();
                    return Err(err);
                }
            }
        }

        if self.is_blocking() {
            self.finish_connect_until(deadline)
        } else {
            Ok(false)
        }
    }

    /// Completes a pending connection.
    ///
    /// Returns `true` once connected, `false` while the connection is still
    /// pending in non-blocking mode. A transport failure closes the handle.
    pub fn finish_connect(self: &Arc<Self>) -> Result<bool> {
        self.finish_connect_until(None)
    }

    pub(crate) fn finish_connect_until(self: &Arc<Self>, deadline: Option<Instant>) -> Result<bool> {
        match self.state() {
            State::Connected => return Ok(true),
            State::Connecting => {}
            State::Closed => return Err(Error::ClosedChannel),
            State::Unbound | State::Bound => return Err(Error::NoConnectionPending),
        }

        let endpoint = self.endpoint()?;
        let blocking = self.is_blocking();
        let _blocker = self.blocker(blocking);

        loop {
            match endpoint.finish_connect() {
                Ok(true) => {
                    return match self.state.compare_exchange(
                        State::Connecting as u8,
                        State::Connected as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => {
                            debug!(handle = self.id, "connected");
                            Ok(true)
                        }
                        Err(current) if State::from_u8(current) == State::Connected => Ok(true),
                        Err(_) => Err(self.cancelled()),
                    };
                }
                Ok(false) => {
                    if !self.is_open() {
                        return Err(self.cancelled());
                    }
                    if !blocking {
                        return Ok(false);
                    }
                    if !self.park(&*endpoint, Wait::Writable, deadline)? {
                        return Err(Error::timed_out("connect"));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(handle = self.id, error = %e, "connection failed");
                    let err = self.failure(e);
                    self.close();
                    return Err(err);
                }
            }
        }
    }

    fn connected_endpoint(&self) -> Result<Arc<dyn Endpoint>> {
        match self.state() {
            State::Connected => self.endpoint(),
            State::Closed => Err(Error::ClosedChannel),
            _ => Err(Error::NotYetConnected),
        }
    }

    /// Reads into `buf`.
    pub fn read(self: &Arc<Self>, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.read_until(buf, None)
    }

    pub(crate) fn read_timeout(
        self: &Arc<Self>,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome> {
        self.read_until(buf, timeout.map(|t| Instant::now() + t))
    }

    fn read_until(self: &Arc<Self>, buf: &mut [u8], deadline: Option<Instant>) -> Result<ReadOutcome> {
        let endpoint = self.connected_endpoint()?;
        if self.input_shut.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::EndOfStream);
        }
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }

        let blocking = self.is_blocking();
        let _blocker = self.blocker(blocking);

        loop {
            match endpoint.read(buf) {
                Ok(0) => {
                    // a close from another thread also reads as end-of-stream
                    if !self.is_open() {
                        return Err(self.cancelled());
                    }
                    return Ok(ReadOutcome::EndOfStream);
                }
                Ok(n) => return Ok(ReadOutcome::Bytes(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !blocking {
                        return Ok(ReadOutcome::Bytes(0));
                    }
                    if !self.park(&*endpoint, Wait::Readable, deadline)? {
                        return Err(Error::timed_out("read"));
                    }
                }
                Err(e) => return Err(self.failure(e)),
            }
        }
    }

    /// Writes from `buf`.
    ///
    /// In blocking mode the whole buffer is written before returning. In
    /// non-blocking mode at most one native write is attempted and `0` means
    /// the transport is back-pressured.
    pub fn write(self: &Arc<Self>, buf: &[u8]) -> Result<usize> {
        let endpoint = self.connected_endpoint()?;
        if self.output_shut.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output has been shut down",
            )));
        }

        let blocking = self.is_blocking();
        let _blocker = self.blocker(blocking);

        let mut written = 0;
        while written < buf.len() {
            match endpoint.write(&buf[written..]) {
                Ok(n) => {
                    written += n;
                    if !blocking {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !blocking {
                        break;
                    }
                    self.park(&*endpoint, Wait::Writable, None)?;
                }
                Err(e) => return Err(self.failure(e)),
            }
        }
        Ok(written)
    }

    /// Accepts one connection on a listening handle; `None` when nothing is
    /// pending in non-blocking mode.
    pub(crate) fn accept(
        self: &Arc<Self>,
        timeout: Option<Duration>,
    ) -> Result<Option<(Box<dyn Endpoint>, SocketAddr)>> {
        match self.state() {
            State::Bound => {}
            State::Closed => return Err(Error::ClosedChannel),
            _ => return Err(Error::NotYetBound),
        }
        let endpoint = self.endpoint()?;
        let blocking = self.is_blocking();
        let _blocker = self.blocker(blocking);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            match endpoint.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !blocking {
                        return Ok(None);
                    }
                    if !self.park(&*endpoint, Wait::Readable, deadline)? {
                        return Err(Error::timed_out("accept"));
                    }
                }
                Err(e) => return Err(self.failure(e)),
            }
        }
    }

    /// Shuts down the read side; later reads see end-of-stream.
    pub fn shutdown_input(&self) -> Result<()> {
        self.shutdown(Shutdown::Read, &self.input_shut)
    }

    /// Shuts down the write side; the peer sees end-of-stream.
    pub fn shutdown_output(&self) -> Result<()> {
        self.shutdown(Shutdown::Write, &self.output_shut)
    }

    fn shutdown(&self, how: Shutdown, flag: &AtomicBool) -> Result<()> {
        let endpoint = self.connected_endpoint()?;
        if !flag.swap(true, Ordering::SeqCst) {
            match endpoint.shutdown(how) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        Ok(self.endpoint()?.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        if self.state() != State::Connected {
            return Ok(None);
        }
        Ok(self.endpoint()?.peer_addr()?)
    }

    pub fn set_option(&self, option: SocketOption, value: OptionValue) -> Result<()> {
        let endpoint = self.endpoint()?;
        options::set_option(&*endpoint, self.role, option, value)
    }

    pub fn option(&self, option: SocketOption) -> Result<OptionValue> {
        let endpoint = self.endpoint()?;
        options::get_option(&*endpoint, self.role, option)
    }

    /// Closes the handle. Closing twice is a no-op.
    ///
    /// Valid selection keys are cancelled, threads blocked on the handle are
    /// released, and the native endpoint is shut down. The descriptor itself
    /// is released once the last selection key has been purged.
    pub fn close(&self) {
        if self.state.swap(State::Closed as u8, Ordering::SeqCst) == State::Closed as u8 {
            return;
        }

        let keys = std::mem::take(&mut *self.keys.lock());
        for key in keys.iter().filter_map(WeakKey::upgrade) {
            key.cancel();
        }

        let endpoint = self.endpoint.lock().take();
        if let Some(endpoint) = endpoint {
            if let Err(e) = endpoint.shutdown(Shutdown::Both) {
                trace!(handle = self.id, error = %e, "shutdown on close");
            }
        }

        if let Some(signal) = self.signal.lock().as_ref() {
            signal.fire();
        }
        debug!(handle = self.id, "closed");
    }
}

impl Interruptible for ConnectionHandle {
    fn interrupt(&self) {
        self.close();
    }
}
