use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

/// What woke the reactor.
///
/// One event is reported per [`Reactor::wait`] call so the owning thread
/// can act on it under whichever locks it needs; remaining readiness is
/// level-triggered and reported by the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    /// A watched descriptor has data (or end-of-stream) to read.
    Readable(RawFd),
    /// A watched descriptor saw no activity within its timeout.
    TimedOut(RawFd),
    /// [`Reactor::interrupt`] was called.
    Interrupted,
    /// [`Reactor::notify`] was called.
    Notified,
}

struct Watch {
    fd: RawFd,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

/// A poll(2)-based event multiplexer serving one endpoint.
///
/// Serialises descriptor readiness, per-descriptor inactivity timeouts,
/// an interrupt wakeup (used to stop the owning thread) and a notify
/// wakeup (used to signal an internal message queue). `wait` is intended
/// to be called from exactly one thread; watch registration and the
/// wakeups may be called from any thread.
pub struct Reactor {
    watches: Mutex<Vec<Watch>>,
    interrupt: WakePipe,
    notify: WakePipe,
    rebuild: WakePipe,
}

struct WakePipe {
    rx: UnixStream,
    tx: UnixStream,
}

impl WakePipe {
    fn new() -> std::io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;
        Ok(Self { rx, tx })
    }

    fn wake(&self) {
        // A full pipe already means a wakeup is pending.
        let _ = (&self.tx).write(&[1]);
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        while matches!((&self.rx).read(&mut buf), Ok(n) if n > 0) {}
    }
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            watches: Mutex::new(Vec::new()),
            interrupt: WakePipe::new()?,
            notify: WakePipe::new()?,
            rebuild: WakePipe::new()?,
        })
    }

    /// Register a read-readiness watch, optionally with an inactivity
    /// timeout. The timeout re-arms on every event for the descriptor.
    pub fn watch(&self, fd: RawFd, timeout: Option<Duration>) {
        let mut watches = self.watches.lock().unwrap();
        watches.retain(|w| w.fd != fd);
        watches.push(Watch {
            fd,
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        });
        drop(watches);
        self.rebuild.wake();
    }

    /// Remove the watch for a descriptor. No-op if not watched.
    pub fn unwatch(&self, fd: RawFd) {
        self.watches.lock().unwrap().retain(|w| w.fd != fd);
        self.rebuild.wake();
    }

    /// Wake the reactor with [`ReactorEvent::Interrupted`].
    pub fn interrupt(&self) {
        self.interrupt.wake();
    }

    /// Wake the reactor with [`ReactorEvent::Notified`].
    pub fn notify(&self) {
        self.notify.wake();
    }

    /// Block until the next event.
    pub fn wait(&self) -> std::io::Result<ReactorEvent> {
        loop {
            let (mut pollfds, deadlines) = self.build_poll_set();
            let timeout_ms = nearest_timeout_ms(&deadlines);

            // SAFETY: `pollfds` is a valid, initialised slice for the
            // given length, and remains alive for the duration of the call.
            let rc = unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms)
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            let now = Instant::now();

            if rc == 0 {
                if let Some(fd) = self.take_expired(now) {
                    return Ok(ReactorEvent::TimedOut(fd));
                }
                // The deadline belonged to a watch that has since been
                // re-armed or removed.
                continue;
            }

            if pollfds[0].revents & libc::POLLIN != 0 {
                self.interrupt.drain();
                return Ok(ReactorEvent::Interrupted);
            }
            if pollfds[1].revents & libc::POLLIN != 0 {
                self.rebuild.drain();
                continue;
            }
            if pollfds[2].revents & libc::POLLIN != 0 {
                self.notify.drain();
                return Ok(ReactorEvent::Notified);
            }

            for entry in &pollfds[WAKE_SLOTS..] {
                if entry.revents & libc::POLLNVAL != 0 {
                    trace!(fd = entry.fd, "dropping watch on invalid descriptor");
                    self.unwatch(entry.fd);
                    continue;
                }
                if entry.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                    self.rearm(entry.fd, now);
                    return Ok(ReactorEvent::Readable(entry.fd));
                }
            }
        }
    }

    fn build_poll_set(&self) -> (Vec<libc::pollfd>, Vec<Option<Instant>>) {
        let watches = self.watches.lock().unwrap();
        let mut pollfds = Vec::with_capacity(WAKE_SLOTS + watches.len());
        for fd in [
            self.interrupt.rx.as_raw_fd(),
            self.rebuild.rx.as_raw_fd(),
            self.notify.rx.as_raw_fd(),
        ] {
            pollfds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        let mut deadlines = Vec::with_capacity(watches.len());
        for watch in watches.iter() {
            pollfds.push(libc::pollfd {
                fd: watch.fd,
                events: libc::POLLIN,
                revents: 0,
            });
            deadlines.push(watch.deadline);
        }
        (pollfds, deadlines)
    }

    fn take_expired(&self, now: Instant) -> Option<RawFd> {
        let mut watches = self.watches.lock().unwrap();
        for watch in watches.iter_mut() {
            if watch.deadline.is_some_and(|d| d <= now) {
                watch.deadline = watch.timeout.map(|t| now + t);
                return Some(watch.fd);
            }
        }
        None
    }

    fn rearm(&self, fd: RawFd, now: Instant) {
        let mut watches = self.watches.lock().unwrap();
        if let Some(watch) = watches.iter_mut().find(|w| w.fd == fd) {
            watch.deadline = watch.timeout.map(|t| now + t);
        }
    }
}

const WAKE_SLOTS: usize = 3;

fn nearest_timeout_ms(deadlines: &[Option<Instant>]) -> libc::c_int {
    let now = Instant::now();
    let nearest = deadlines.iter().flatten().min();
    match nearest {
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(now);
            // Round up so a sub-millisecond remainder does not spin.
            let ms = (remaining.as_micros() + 999) / 1000;
            ms.min(i32::MAX as u128) as libc::c_int
        }
        None => -1,
    }
}
