//! Polling backends for the selector.
//!
//! A transport hands the selector a `Poller` (register/reregister/deregister/
//! poll) and a `Wake` that another thread can use to interrupt a blocked poll.
//! The default backend wraps `mio::Poll`, which is edge-triggered; the
//! selector re-arms keys that fired so callers still see level-triggered
//! selection.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Poll, Token};

/// Token reserved for the wake-up source.
pub const WAKE_TOKEN: usize = usize::MAX;

/// Readiness directions a descriptor is polled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);

    pub fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

/// One readiness notification, independent of the backend.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: usize,
    readable: bool,
    writable: bool,
    error: bool,
    hup: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("error", &self.error)
            .field("hup", &self.hup)
            .finish()
    }
}

impl Readiness {
    pub fn new(token: usize, readable: bool, writable: bool, error: bool, hup: bool) -> Self {
        Self {
            token,
            readable,
            writable,
            error,
            hup,
        }
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Peer hang-up in both directions.
    pub fn is_hup(&self) -> bool {
        self.hup
    }
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            token: event.token().0,
            readable: event.is_readable(),
            writable: event.is_writable(),
            error: event.is_error(),
            hup: event.is_read_closed() && event.is_write_closed(),
        }
    }
}

/// Interrupts a blocked `Poller::poll` from another thread.
pub trait Wake: Send + Sync {
    fn wake(&self) -> io::Result<()>;
}

/// Native readiness mechanism used by one selector.
pub trait Poller: Send {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Waits for readiness and replaces the contents of `out`.
    ///
    /// A wake-up shows up as a `Readiness` carrying `WAKE_TOKEN`.
    fn poll(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()>;
}

/// `Poller` backed by `mio::Poll`.
pub struct MioPoller {
    poller: Poll,
    events: Events,
}

struct MioWaker(mio::Waker);

impl Wake for MioWaker {
    fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}

impl MioPoller {
    pub fn new(events_capacity: usize) -> io::Result<(Self, Arc<dyn Wake>)> {
        let poller = Poll::new()?;
        let waker = mio::Waker::new(poller.registry(), Token(WAKE_TOKEN))?;
        Ok((
            MioPoller {
                poller,
                events: Events::with_capacity(events_capacity.max(1)),
            },
            Arc::new(MioWaker(waker)),
        ))
    }
}

fn to_mio(interest: Interest) -> io::Result<mio::Interest> {
    match (interest.is_readable(), interest.is_writable()) {
        (true, true) => Ok(mio::Interest::READABLE | mio::Interest::WRITABLE),
        (true, false) => Ok(mio::Interest::READABLE),
        (false, true) => Ok(mio::Interest::WRITABLE),
        (false, false) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty poll interest",
        )),
    }
}

impl Poller for MioPoller {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poller
            .registry()
            .register(&mut SourceFd(&fd), Token(token), to_mio(interest)?)
    }

    fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poller
            .registry()
            .reregister(&mut SourceFd(&fd), Token(token), to_mio(interest)?)
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poller.registry().deregister(&mut SourceFd(&fd))
    }

    fn poll(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        out.clear();
        self.poller.poll(&mut self.events, timeout)?;
        out.extend(self.events.iter().map(Readiness::from));
        Ok(())
    }
}
