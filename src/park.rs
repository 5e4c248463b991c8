//! Parking a thread on a single descriptor.
//!
//! Blocking-mode operations run on non-blocking descriptors and park here
//! when the transport would block. A `CloseSignal` is polled alongside the
//! descriptor so that closing the channel from another thread releases
//! every parked thread at once.

use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use mio::unix::pipe;
use parking_lot::Mutex;

use crate::transport::Wait;

/// One-shot, level-triggered close notification.
///
/// The pipe is written once and never drained, so it stays readable for
/// every current and future waiter.
#[derive(Debug)]
pub(crate) struct CloseSignal {
    sender: Mutex<Option<pipe::Sender>>,
    receiver: pipe::Receiver,
}

impl CloseSignal {
    pub(crate) fn new() -> io::Result<Self> {
        let (sender, receiver) = pipe::new()?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        })
    }

    pub(crate) fn fire(&self) {
        if let Some(mut sender) = self.sender.lock().take() {
            // A full pipe is still readable, which is all waiters need.
            let _ = sender.write(&[1]);
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.receiver.as_raw_fd()
    }
}

/// Parks until `fd` is ready for `wait`, `signal` fires, or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. Spurious `EINTR` wake-ups are retried with
/// the remaining time; the caller re-checks channel state after every return.
pub(crate) fn wait(
    fd: RawFd,
    wait: Wait,
    signal: RawFd,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    let events = match wait {
        Wait::Readable => libc::POLLIN,
        Wait::Writable => libc::POLLOUT,
    };
    let mut fds = [
        libc::pollfd {
            fd,
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: signal,
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        let timeout_ms = match deadline {
            None => -1,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // round up so a sub-millisecond remainder still waits
                let ms = remaining.as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        // SAFETY: `fds` is a live, exclusively borrowed array of initialised
        // `pollfd`s and the length passed is exactly its element count.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}
