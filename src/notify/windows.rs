// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// WaitForMultipleObjects-backed handle multiplexer.

use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use windows_sys::Win32::Foundation::{
    FALSE, HANDLE, WAIT_ABANDONED_0, WAIT_FAILED, WAIT_OBJECT_0,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, SetEvent, WaitForMultipleObjects, INFINITE,
};

use crate::callback::NameCallbackManager;
use crate::error::{Error, Result};
use crate::handle::NativeHandle;

/// MAXIMUM_WAIT_OBJECTS, less the slot taken by the wake-up event.
pub const MAX_HANDLES: usize = 64 - 1;

// Handles are raw pointers, which are neither Send nor Sync; they are keyed
// by address instead.
type HandleKey = usize;

#[derive(Default)]
struct Watched {
    // Registrations per distinct handle.
    counts: HashMap<HandleKey, usize>,
    registrations: HashMap<u64, HandleKey>,
}

struct Shared {
    wake: NativeHandle,
    watched: Mutex<Watched>,
    // Bumped on every change to `watched`.
    generation: AtomicU64,
    callbacks: NameCallbackManager<HandleKey, ()>,
    running: AtomicBool,
}

impl Shared {
    fn wake(&self) {
        if unsafe { SetEvent(self.wake.as_raw()) } == 0 {
            tracing::warn!(error = %Error::last_os("SetEvent"), "failed to wake notifier thread");
        }
    }

    fn snapshot(&self) -> (u64, Vec<HandleKey>) {
        let watched = self.watched.lock();
        let generation = self.generation.load(Ordering::Acquire);
        let mut keys: Vec<_> = watched.counts.keys().copied().collect();
        keys.sort_unstable();
        (generation, keys)
    }

    fn run(&self) {
        tracing::debug!("handle notifier thread started");
        while self.running.load(Ordering::Acquire) {
            let (generation, keys) = self.snapshot();
            let mut handles: Vec<HANDLE> = Vec::with_capacity(keys.len() + 1);
            handles.push(self.wake.as_raw());
            handles.extend(keys.iter().map(|&k| k as HANDLE));

            let ret = unsafe {
                WaitForMultipleObjects(handles.len() as u32, handles.as_ptr(), FALSE, INFINITE)
            };
            let count = handles.len() as u32;
            let index = if (WAIT_OBJECT_0..WAIT_OBJECT_0 + count).contains(&ret) {
                (ret - WAIT_OBJECT_0) as usize
            } else if (WAIT_ABANDONED_0..WAIT_ABANDONED_0 + count).contains(&ret) {
                (ret - WAIT_ABANDONED_0) as usize
            } else if ret == WAIT_FAILED {
                // A handle removed and closed while we waited on it.
                if self.generation.load(Ordering::Acquire) != generation {
                    continue;
                }
                tracing::error!(error = %Error::last_os("WaitForMultipleObjects"), "handle notifier stopped");
                break;
            } else {
                tracing::error!(ret, "unexpected WaitForMultipleObjects result");
                break;
            };

            if index == 0 {
                tracing::trace!("handle notifier woken");
                continue;
            }
            let key = keys[index - 1];
            tracing::trace!(handle = key, "dispatching handle signal");
            self.callbacks.call(&key, &());
        }
        tracing::debug!("handle notifier thread exiting");
    }
}

/// Watches a set of waitable handles on one background thread and invokes
/// callbacks when they are signalled.
///
/// At most [`MAX_HANDLES`] distinct handles can be watched at once.
pub struct HandleSetNotify {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    automatic: bool,
}

impl HandleSetNotify {
    /// With `automatic`, the thread starts on the first registration and
    /// stops when the notifier is dropped. Otherwise call `start`/`stop`.
    pub fn new(automatic: bool) -> Result<Self> {
        let raw = unsafe { CreateEventW(ptr::null(), FALSE, FALSE, ptr::null()) };
        let wake = NativeHandle::check("CreateEventW", raw)?;

        let callbacks = NameCallbackManager::new(0, false);
        callbacks.set_fault_handler(|fault| {
            tracing::error!(id = fault.id, message = %fault.message, "notifier callback panicked");
        });

        Ok(Self {
            shared: Arc::new(Shared {
                wake,
                watched: Mutex::new(Watched::default()),
                generation: AtomicU64::new(0),
                callbacks,
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            automatic,
        })
    }

    /// Invoke `callback` each time `handle` is observed signalled.
    pub fn add_handle_state_callback<F>(&self, handle: HANDLE, callback: F) -> Result<u64>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if handle.is_null() {
            return Err(Error::InvalidArgument("null handle"));
        }
        let key = handle as HandleKey;
        let mut watched = self.shared.watched.lock();
        if !watched.counts.contains_key(&key) && watched.counts.len() >= MAX_HANDLES {
            return Err(Error::InvalidArgument("too many handles for one notifier"));
        }
        let id = self.shared.callbacks.add_callback(key, move |_: &()| callback());
        if id == 0 {
            return Err(Error::InvalidArgument("callback capacity exceeded"));
        }
        *watched.counts.entry(key).or_default() += 1;
        watched.registrations.insert(id, key);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        drop(watched);

        tracing::debug!(handle = key, id, "registered handle callback");
        self.shared.wake();
        if self.automatic && !self.is_running() {
            self.start()?;
        }
        Ok(id)
    }

    /// Unregister a callback. With `wait`, blocks until an invocation in
    /// progress has returned.
    pub fn remove_handle_state_callback(&self, id: u64, wait: bool) -> bool {
        {
            let mut watched = self.shared.watched.lock();
            let Some(key) = watched.registrations.remove(&id) else {
                return false;
            };
            if let Some(count) = watched.counts.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    watched.counts.remove(&key);
                }
            }
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.wake();
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
            .name("handle-set-notify".into())
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
            tracing::error!("handle notifier thread panicked");
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

impl Drop for HandleSetNotify {
    fn drop(&mut self) {
        debug_assert!(
            self.automatic || !self.is_running(),
            "HandleSetNotify dropped with its thread running; call stop() first"
        );
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop handle notifier");
        }
    }
}
