//! Cross-thread wake-up for the blocking message wait.
//!
//! The processing thread blocks in `poll(2)` on the server socket. To stop it
//! from another thread, the wait also watches the read end of a Unix socket
//! pair; [`InterruptSignal::signal`] writes one byte to the other end.
//!
//! The read end is drained after every wake, so signals that piled up before
//! the wait returned coalesce into that one wake and cannot end a later wait.
//! A queued byte is the only record of a signal; there is no separate pending
//! flag to fall out of step with the socket.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

/// Result of [`wait_readable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched descriptor has data, or has hung up.
    Readable,
    TimedOut,
    Interrupted,
}

/// Signal side of an [`InterruptChannel`]. Cheap to clone, usable from any
/// thread.
#[derive(Clone)]
pub struct InterruptSignal {
    sender: Arc<UnixStream>,
}

/// Wait side of the interrupt channel, owned by the processing thread.
pub struct InterruptChannel {
    receiver: UnixStream,
    signal: InterruptSignal,
}

impl InterruptChannel {
    /// Creates the socket pair. Fails only if the OS is out of descriptors or
    /// memory; callers then fall back to timeout-only cancellation.
    pub fn new() -> io::Result<Self> {
        let (receiver, sender) = UnixStream::pair()?;
        receiver.set_nonblocking(true)?;
        sender.set_nonblocking(true)?;

        Ok(Self {
            receiver,
            signal: InterruptSignal {
                sender: Arc::new(sender),
            },
        })
    }

    pub fn signal_handle(&self) -> InterruptSignal {
        self.signal.clone()
    }

    pub fn signal(&self) {
        self.signal.signal();
    }

    /// Consumes any queued wake-up bytes.
    ///
    /// A signal whose byte is read here was sent before the wait that is being
    /// ended returned, so that wait answers it.
    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.receiver).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to drain interrupt channel: {}", e);
                    break;
                }
            }
        }
    }
}

impl AsRawFd for InterruptChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.receiver.as_raw_fd()
    }
}

impl InterruptSignal {
    /// Wakes the current or next wait on the channel.
    ///
    /// Non-blocking and idempotent: signals that arrive before the wait has
    /// drained the channel are merged into one wake.
    pub fn signal(&self) {
        match (&*self.sender).write(&[1]) {
            Ok(_) => {}
            // Socket buffer full: a wake-up is already queued.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("Failed to signal interrupt channel: {}", e),
        }
    }
}

/// Blocks until `fd` is readable, `interrupt` is signalled, or `timeout`
/// elapses.
///
/// The timeout is rounded up to whole milliseconds. A `poll(2)` interrupted by
/// a POSIX signal is reported as [`WaitOutcome::TimedOut`]; the caller simply
/// tries again on its next iteration. When both the descriptor and the
/// interrupt are ready, the interrupt wins.
pub fn wait_readable(
    fd: RawFd,
    interrupt: Option<&InterruptChannel>,
    timeout: Duration,
) -> io::Result<WaitOutcome> {
    let mut fds = [
        libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: interrupt.map_or(-1, |channel| channel.as_raw_fd()),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let count: libc::nfds_t = if interrupt.is_some() { 2 } else { 1 };

    let micros = timeout.as_micros();
    let millis = i32::try_from(micros.div_ceil(1000)).unwrap_or(i32::MAX);

    // SAFETY: `fds` outlives the call and `count` never exceeds its length.
    let ready = unsafe { libc::poll(fds.as_mut_ptr(), count, millis) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            debug!("poll() interrupted by a signal");
            return Ok(WaitOutcome::TimedOut);
        }
        return Err(err);
    }
    if ready == 0 {
        return Ok(WaitOutcome::TimedOut);
    }

    if let Some(channel) = interrupt {
        if fds[1].revents != 0 {
            channel.drain();
            return Ok(WaitOutcome::Interrupted);
        }
    }

    let revents = fds[0].revents;
    if revents & libc::POLLNVAL != 0 {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
        return Ok(WaitOutcome::Readable);
    }
    Ok(WaitOutcome::TimedOut)
}
