//! Readiness-based I/O reactor
//!
//! Wraps one OS-level readiness poll per [`Reactor::wait`] call. Each
//! registration is one-shot: a waiter that fires is consumed and must be
//! re-added before the next wait. Reader and writer registrations on the
//! same fd are tracked independently, so a duplex stream can have one task
//! blocked on read and another blocked on write simultaneously.
//!
//! A resource signalling error or hangup wakes its waiters once with the
//! error flag set and unregisters both directions, so a dead fd can never
//! busy-loop the scheduler.

use crate::arena::TaskRef;
use crate::task::Fd;
use crate::ProgrammingError;
use rustc_hash::FxHashMap;
use std::io;
use std::time::Duration;

/// Readiness reported for a woken waiter.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Readiness {
    /// The fd can be read without blocking
    pub readable: bool,
    /// The fd can be written without blocking
    pub writable: bool,
    /// The fd reported an error, hangup, or invalid state; its
    /// registrations were dropped
    pub error: bool,
}

#[derive(Default)]
struct FdEntry {
    reader: Option<TaskRef>,
    writer: Option<TaskRef>,
}

/// One-shot readiness reactor over `poll(2)`.
pub struct Reactor {
    fds: FxHashMap<Fd, FdEntry>,
}

impl Reactor {
    /// Create an empty reactor.
    pub fn new() -> Self {
        Self {
            fds: FxHashMap::default(),
        }
    }

    /// Register `waiter` for read readiness on `fd`.
    ///
    /// At most one waiter per (fd, direction); a second registration is a
    /// programming error.
    pub fn add_reader(&mut self, fd: Fd, waiter: TaskRef) -> Result<(), ProgrammingError> {
        let entry = self.fds.entry(fd).or_default();
        if entry.reader.is_some() {
            return Err(ProgrammingError::FdBusy(fd));
        }
        entry.reader = Some(waiter);
        Ok(())
    }

    /// Register `waiter` for write readiness on `fd`.
    pub fn add_writer(&mut self, fd: Fd, waiter: TaskRef) -> Result<(), ProgrammingError> {
        let entry = self.fds.entry(fd).or_default();
        if entry.writer.is_some() {
            return Err(ProgrammingError::FdBusy(fd));
        }
        entry.writer = Some(waiter);
        Ok(())
    }

    /// Drop the read registration on `fd`, returning its waiter.
    pub fn remove_reader(&mut self, fd: Fd) -> Option<TaskRef> {
        let entry = self.fds.get_mut(&fd)?;
        let waiter = entry.reader.take();
        if entry.reader.is_none() && entry.writer.is_none() {
            self.fds.remove(&fd);
        }
        waiter
    }

    /// Drop the write registration on `fd`, returning its waiter.
    pub fn remove_writer(&mut self, fd: Fd) -> Option<TaskRef> {
        let entry = self.fds.get_mut(&fd)?;
        let waiter = entry.writer.take();
        if entry.reader.is_none() && entry.writer.is_none() {
            self.fds.remove(&fd);
        }
        waiter
    }

    /// Whether any registrations exist.
    pub fn has_registrations(&self) -> bool {
        !self.fds.is_empty()
    }

    /// Number of registered waiters across all fds and directions.
    pub fn waiter_count(&self) -> usize {
        self.fds
            .values()
            .map(|e| e.reader.is_some() as usize + e.writer.is_some() as usize)
            .sum()
    }

    /// Perform one readiness poll with the given timeout (`None` blocks
    /// indefinitely) and return each woken waiter exactly once, consuming
    /// its registration.
    #[cfg(unix)]
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(TaskRef, Readiness)>> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        if self.fds.is_empty() {
            if timeout_ms > 0 {
                std::thread::sleep(Duration::from_millis(timeout_ms as u64));
            }
            return Ok(Vec::new());
        }

        let mut pollfds: Vec<libc::pollfd> = self
            .fds
            .iter()
            .map(|(&fd, entry)| {
                let mut events: libc::c_short = 0;
                if entry.reader.is_some() {
                    events |= libc::POLLIN;
                }
                if entry.writer.is_some() {
                    events |= libc::POLLOUT;
                }
                libc::pollfd {
                    fd,
                    events,
                    revents: 0,
                }
            })
            .collect();

        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let mut woken = Vec::new();
        for pfd in &pollfds {
            if pfd.revents == 0 {
                continue;
            }
            let error = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
            let readable = pfd.revents & libc::POLLIN != 0;
            let writable = pfd.revents & libc::POLLOUT != 0;

            let Some(entry) = self.fds.get_mut(&pfd.fd) else {
                continue;
            };

            if error {
                // Dead resource: wake both directions once and drop the fd
                // entirely so it cannot spin the poll loop.
                log::debug!("reactor: fd {} error/hangup, unregistering", pfd.fd);
                let readiness = Readiness {
                    readable,
                    writable,
                    error: true,
                };
                if let Some(w) = entry.reader.take() {
                    woken.push((w, readiness));
                }
                if let Some(w) = entry.writer.take() {
                    woken.push((w, readiness));
                }
                self.fds.remove(&pfd.fd);
                continue;
            }

            if readable {
                if let Some(w) = entry.reader.take() {
                    woken.push((
                        w,
                        Readiness {
                            readable: true,
                            ..Readiness::default()
                        },
                    ));
                }
            }
            if writable {
                if let Some(w) = entry.writer.take() {
                    woken.push((
                        w,
                        Readiness {
                            writable: true,
                            ..Readiness::default()
                        },
                    ));
                }
            }
            if entry.reader.is_none() && entry.writer.is_none() {
                self.fds.remove(&pfd.fd);
            }
        }
        Ok(woken)
    }

    /// Fallback for targets without `poll(2)`: sleeps out the timeout.
    /// Registrations never fire; timer-driven scheduling still works.
    #[cfg(not(unix))]
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<(TaskRef, Readiness)>> {
        if let Some(d) = timeout {
            std::thread::sleep(d);
        }
        Ok(Vec::new())
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}
