// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// epoll-backed readiness multiplexer.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::Readiness;
use crate::callback::NameCallbackManager;
use crate::error::{Error, Result};
use crate::handle::NativeHandle;

const MAX_EVENTS: usize = 64;

const READ_MASK: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
const WRITE_MASK: u32 = libc::EPOLLOUT as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
    Both,
}

impl Direction {
    fn reads(self) -> bool {
        matches!(self, Self::Read | Self::Both)
    }

    fn writes(self) -> bool {
        matches!(self, Self::Write | Self::Both)
    }
}

/// Per-fd reference counts, one per direction.
#[derive(Debug, Default, Clone, Copy)]
struct FdState {
    readable: usize,
    writable: usize,
}

impl FdState {
    fn mask(self) -> u32 {
        let mut mask = 0;
        if self.readable > 0 {
            mask |= READ_MASK;
        }
        if self.writable > 0 {
            mask |= WRITE_MASK;
        }
        mask
    }
}

/// The epoll_ctl call needed to move an fd between two interest masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    None,
    Add(u32),
    Modify(u32),
    Delete,
}

fn change(old: u32, new: u32) -> Change {
    match (old, new) {
        (o, n) if o == n => Change::None,
        (0, n) => Change::Add(n),
        (_, 0) => Change::Delete,
        (_, n) => Change::Modify(n),
    }
}

/// Registration bookkeeping. Kept apart from epoll so the transitions can be
/// checked without a kernel object.
#[derive(Debug, Default)]
struct Interest {
    fds: HashMap<RawFd, FdState>,
    registrations: HashMap<u64, (RawFd, Direction)>,
}

impl Interest {
    fn acquire(&mut self, fd: RawFd, dir: Direction) -> Change {
        let state = self.fds.entry(fd).or_default();
        let old = state.mask();
        if dir.reads() {
            state.readable += 1;
        }
        if dir.writes() {
            state.writable += 1;
        }
        change(old, state.mask())
    }

    fn release(&mut self, fd: RawFd, dir: Direction) -> Change {
        let Some(state) = self.fds.get_mut(&fd) else {
            return Change::None;
        };
        let old = state.mask();
        if dir.reads() {
            state.readable = state.readable.saturating_sub(1);
        }
        if dir.writes() {
            state.writable = state.writable.saturating_sub(1);
        }
        let new = state.mask();
        if new == 0 {
            self.fds.remove(&fd);
        }
        change(old, new)
    }
}

impl Readiness {
    fn from_epoll(events: u32) -> Self {
        let has = |flag: libc::c_int| events & flag as u32 != 0;
        let hangup = has(libc::EPOLLHUP) || has(libc::EPOLLRDHUP);
        let error = has(libc::EPOLLERR);
        Self {
            readable: has(libc::EPOLLIN) || hangup || error,
            writable: has(libc::EPOLLOUT) || error,
            hangup,
            error,
        }
    }
}

struct Shared {
    epoll: NativeHandle,
    wake: NativeHandle,
    interest: Mutex<Interest>,
    callbacks: NameCallbackManager<RawFd, Readiness>,
    running: AtomicBool,
}

impl Shared {
    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epoll.as_raw(), op, fd, &mut event) } != 0 {
            return Err(Error::last_os("epoll_ctl"));
        }
        Ok(())
    }

    fn apply(&self, fd: RawFd, change: Change) -> Result<()> {
        match change {
            Change::None => Ok(()),
            Change::Add(mask) => self.ctl(libc::EPOLL_CTL_ADD, fd, mask),
            Change::Modify(mask) => self.ctl(libc::EPOLL_CTL_MOD, fd, mask),
            Change::Delete => self.ctl(libc::EPOLL_CTL_DEL, fd, 0),
        }
    }

    fn wake(&self) {
        let one: u64 = 1;
        let n = unsafe {
            libc::write(
                self.wake.as_raw(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN means the counter is already non-zero: a wake-up is pending.
        if n < 0 {
            let err = Error::last_os("eventfd write");
            if err.raw_os_error() != Some(libc::EAGAIN) {
                tracing::warn!(error = %err, "failed to wake notifier thread");
            }
        }
    }

    fn drain_wake(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.wake.as_raw(),
                (&mut value as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
    }

    fn run(&self) {
        let wake_fd = self.wake.as_raw();
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        tracing::debug!("fd notifier thread started");

        while self.running.load(Ordering::Acquire) {
            let n = unsafe {
                libc::epoll_wait(self.epoll.as_raw(), events.as_mut_ptr(), MAX_EVENTS as i32, -1)
            };
            if n < 0 {
                let err = Error::last_os("epoll_wait");
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                tracing::error!(error = %err, "fd notifier stopped");
                break;
            }

            for event in &events[..n as usize] {
                let (mask, data) = (event.events, event.u64);
                let fd = data as RawFd;
                if fd == wake_fd {
                    tracing::trace!("fd notifier woken");
                    self.drain_wake();
                    continue;
                }
                let readiness = Readiness::from_epoll(mask);
                tracing::trace!(fd, ?readiness, "dispatching readiness");
                self.callbacks.call(&fd, &readiness);
            }
        }
        tracing::debug!("fd notifier thread exiting");
    }
}

/// Watches a set of file descriptors on one background thread and invokes
/// callbacks when they become readable or writable.
///
/// Interest is level-triggered: a callback keeps firing for as long as its
/// condition holds, so a readable callback should drain the fd.
///
/// Callbacks run on the notifier thread and may register or remove other
/// callbacks. A callback that panics is logged and skipped.
pub struct FdSetNotify {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    automatic: bool,
}

impl FdSetNotify {
    /// With `automatic`, the thread starts on the first registration and
    /// stops when the notifier is dropped. Otherwise call `start`/`stop`.
    pub fn new(automatic: bool) -> Result<Self> {
        let epoll = NativeHandle::check("epoll_create1", unsafe {
            libc::epoll_create1(libc::EPOLL_CLOEXEC)
        })?;
        let wake = NativeHandle::check("eventfd", unsafe {
            libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC)
        })?;

        let callbacks = NameCallbackManager::new(0, false);
        callbacks.set_fault_handler(|fault| {
            tracing::error!(id = fault.id, message = %fault.message, "notifier callback panicked");
        });

        let shared = Arc::new(Shared {
            epoll,
            wake,
            interest: Mutex::new(Interest::default()),
            callbacks,
            running: AtomicBool::new(false),
        });
        let wake_fd = shared.wake.as_raw();
        shared.ctl(libc::EPOLL_CTL_ADD, wake_fd, libc::EPOLLIN as u32)?;

        Ok(Self {
            shared,
            worker: Mutex::new(None),
            automatic,
        })
    }

    /// Invoke `callback` whenever `fd` is readable (or hung up / in error).
    pub fn add_readable_callback<F>(&self, fd: RawFd, callback: F) -> Result<u64>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(fd, Direction::Read, move |r: &Readiness| {
            if r.readable {
                callback()
            }
        })
    }

    /// Invoke `callback` whenever `fd` is writable (or in error).
    pub fn add_writable_callback<F>(&self, fd: RawFd, callback: F) -> Result<u64>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(fd, Direction::Write, move |r: &Readiness| {
            if r.writable {
                callback()
            }
        })
    }

    /// Watch `fd` in both directions and hand every event to `callback`.
    pub fn add_state_callback<F>(&self, fd: RawFd, callback: F) -> Result<u64>
    where
        F: Fn(Readiness) + Send + Sync + 'static,
    {
        self.register(fd, Direction::Both, move |r: &Readiness| callback(*r))
    }

    fn register<F>(&self, fd: RawFd, dir: Direction, callback: F) -> Result<u64>
    where
        F: Fn(&Readiness) + Send + Sync + 'static,
    {
        if fd < 0 {
            return Err(Error::InvalidArgument("negative file descriptor"));
        }
        if fd == self.shared.wake.as_raw() || fd == self.shared.epoll.as_raw() {
            return Err(Error::InvalidArgument("file descriptor belongs to the notifier"));
        }
        let mut interest = self.shared.interest.lock();
        let id = self.shared.callbacks.add_callback(fd, callback);
        if id == 0 {
            return Err(Error::InvalidArgument("callback capacity exceeded"));
        }
        let change = interest.acquire(fd, dir);
        if let Err(e) = self.shared.apply(fd, change) {
            interest.release(fd, dir);
            self.shared.callbacks.remove_callback(id, false);
            return Err(e);
        }
        interest.registrations.insert(id, (fd, dir));
        tracing::debug!(fd, id, ?dir, "registered fd callback");
        drop(interest);

        if self.automatic && !self.is_running() {
            self.start()?;
        }
        Ok(id)
    }

    /// Unregister a callback returned by one of the `add_*` methods. With
    /// `wait`, blocks until an invocation in progress has returned.
    pub fn remove_state_callback(&self, id: u64, wait: bool) -> bool {
        {
            let mut interest = self.shared.interest.lock();
            let Some((fd, dir)) = interest.registrations.remove(&id) else {
                return false;
            };
            let change = interest.release(fd, dir);
            // The fd may already be closed, which removes it from epoll.
            if let Err(e) = self.shared.apply(fd, change) {
                tracing::warn!(fd, error = %e, "failed to update epoll interest");
            }
        }
        self.shared.callbacks.remove_callback(id, wait)
    }

    /// Start the notifier thread. Does nothing if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("fd-set-notify".into())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::io("spawn notifier thread", e)
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the notifier thread and wait for it to exit. Called from a
    /// callback, the thread is told to stop but not joined.
    pub fn stop(&self) -> Result<()> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake();
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        if handle.join().is_err() {
            tracing::error!("fd notifier thread panicked");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }
}

impl Drop for FdSetNotify {
    fn drop(&mut self) {
        debug_assert!(
            self.automatic || !self.is_running(),
            "FdSetNotify dropped with its thread running; call stop() first"
        );
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop fd notifier");
        }
    }
}
