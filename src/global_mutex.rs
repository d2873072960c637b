// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named inter-process mutex.
// Delegates to platform::PlatformMutex (Linux or Windows).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::name;
use crate::platform::PlatformMutex;

/// A named, inter-process mutex.
///
/// On Linux this is a robust, process-shared `pthread_mutex_t` kept in a
/// shared memory record. On Windows it is a named kernel mutex.
///
/// If the process holding the lock dies, the next `lock` succeeds and a
/// warning is logged. Whatever state the lock protected may be half-written;
/// callers that care must validate it themselves.
pub struct GlobalMutex {
    name: String,
    inner: PlatformMutex,
    // Whether this handle currently holds the lock. Only consulted by debug
    // assertions.
    held: AtomicBool,
}

impl GlobalMutex {
    /// Open the mutex `name`, creating it if it does not exist.
    pub fn open_or_create(name: &str) -> Result<Self> {
        name::validate(name)?;
        let inner = PlatformMutex::open_or_create(name)?;
        tracing::debug!(name, "opened global mutex");
        Ok(Self::wrap(name, inner))
    }

    /// Open an existing mutex.
    pub fn open(name: &str) -> Result<Self> {
        name::validate(name)?;
        let inner = PlatformMutex::open(name)?;
        Ok(Self::wrap(name, inner))
    }

    fn wrap(name: &str, inner: PlatformMutex) -> Self {
        Self {
            name: name.to_string(),
            inner,
            held: AtomicBool::new(false),
        }
    }

    /// Remove the backing record of the mutex `name`. Handles that are
    /// already open keep working. No-op on Windows.
    pub fn clear(name: &str) -> Result<()> {
        name::validate(name)?;
        match PlatformMutex::clear(name) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> Result<()> {
        self.inner.lock()?;
        self.mark_held();
        Ok(())
    }

    /// Take the lock if it is free. Returns `Ok(false)` if another owner
    /// holds it.
    pub fn try_lock(&self) -> Result<bool> {
        let locked = self.inner.try_lock()?;
        if locked {
            self.mark_held();
        }
        Ok(locked)
    }

    pub fn unlock(&self) -> Result<()> {
        let was_held = self.held.swap(false, Ordering::Relaxed);
        debug_assert!(was_held, "unlock of global mutex {:?} that is not locked", self.name);
        self.inner.unlock()
    }

    /// Lock and return a guard that unlocks on drop.
    pub fn lock_guard(&self) -> Result<GlobalMutexGuard<'_>> {
        self.lock()?;
        Ok(GlobalMutexGuard { mutex: self })
    }

    fn mark_held(&self) {
        let was_held = self.held.swap(true, Ordering::Relaxed);
        debug_assert!(!was_held, "global mutex {:?} locked twice through one handle", self.name);
    }
}

impl Drop for GlobalMutex {
    fn drop(&mut self) {
        debug_assert!(
            !self.held.load(Ordering::Relaxed),
            "global mutex {:?} dropped while locked",
            self.name
        );
    }
}

impl std::fmt::Debug for GlobalMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalMutex").field("name", &self.name).finish()
    }
}

/// Holds a [`GlobalMutex`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct GlobalMutexGuard<'a> {
    mutex: &'a GlobalMutex,
}

impl GlobalMutexGuard<'_> {
    /// The mutex this guard holds.
    pub fn mutex(&self) -> &GlobalMutex {
        self.mutex
    }
}

impl Drop for GlobalMutexGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.unlock() {
            tracing::warn!(name = %self.mutex.name, error = %e, "failed to unlock global mutex");
        }
    }
}
