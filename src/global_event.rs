// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process event.
// Delegates to platform::PlatformEvent (Linux or Windows).

use std::time::Duration;

use crate::error::Result;
use crate::name;
use crate::platform::PlatformEvent;

/// A named, inter-process event.
///
/// A manual-reset event stays signalled after `set` until `reset`, releasing
/// every waiter. An auto-reset event is cleared by the one wait it releases.
///
/// On Linux the event is a mutex, a `CLOCK_MONOTONIC` condition variable and
/// a flag kept together in a shared memory record; on Windows it is a named
/// kernel event.
pub struct GlobalEvent {
    name: String,
    inner: PlatformEvent,
}

impl GlobalEvent {
    /// Open the event `name`, creating it if it does not exist. `manual`
    /// only takes effect when this call creates the event.
    pub fn open_or_create(name: &str, manual: bool) -> Result<Self> {
        name::validate(name)?;
        let inner = PlatformEvent::open_or_create(name, manual)?;
        tracing::debug!(name, manual, "opened global event");
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    /// Open an existing event.
    pub fn open(name: &str) -> Result<Self> {
        name::validate(name)?;
        let inner = PlatformEvent::open(name)?;
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    /// Remove the backing record of the event `name`. No-op on Windows.
    pub fn clear(name: &str) -> Result<()> {
        name::validate(name)?;
        match PlatformEvent::clear(name) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the event is manual-reset.
    pub fn is_manual(&self) -> bool {
        self.inner.is_manual()
    }

    /// Signal the event, waking every waiter.
    pub fn set(&self) -> Result<()> {
        self.inner.set()
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.reset()
    }

    /// Block until the event is signalled.
    pub fn wait(&self) -> Result<()> {
        self.inner.wait()
    }

    /// Block until the event is signalled or `timeout` has elapsed.
    /// Returns `Ok(false)` on timeout. Spurious wake-ups never shorten or
    /// extend the total wait.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.inner.wait_timeout(timeout)
    }

    /// PID of the process that created the event, if that process is still
    /// running. A recycled PID is reported as `Error::ProcessNotFound`.
    #[cfg(target_os = "linux")]
    pub fn alive_creator(&self) -> Result<crate::process::Pid> {
        self.inner.alive_creator()
    }
}

impl std::fmt::Debug for GlobalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalEvent")
            .field("name", &self.name)
            .field("manual", &self.is_manual())
            .finish()
    }
}
