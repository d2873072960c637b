// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Whole-file advisory reader/writer lock.
//
// OS file locks are per open file description (flock) or per handle
// (LockFileEx), so threads of one process sharing a FileMutex would not
// exclude each other through the OS alone. An in-process reader/writer lock
// is taken first and the OS lock second.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{Mutex, RawRwLock};

use crate::error::{Error, Result};
use crate::handle::RawNative;
use crate::platform;

/// Advisory lock on a whole file, shared between threads and processes.
pub struct FileMutex {
    path: PathBuf,
    file: File,
    local: RawRwLock,
    // In-process shared holders. The first takes the OS shared lock and the
    // last releases it.
    readers: Mutex<usize>,
}

impl FileMutex {
    /// Lock the existing file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("open lock file", e))?;
        Ok(Self::with_file(path, file))
    }

    /// Lock the file at `path`, creating it empty if it does not exist.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io("create lock file", e))?;
        Ok(Self::with_file(path, file))
    }

    fn with_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            local: RawRwLock::INIT,
            readers: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw(&self) -> RawNative {
        #[cfg(unix)]
        {
            std::os::fd::AsRawFd::as_raw_fd(&self.file)
        }
        #[cfg(windows)]
        {
            std::os::windows::io::AsRawHandle::as_raw_handle(&self.file) as RawNative
        }
    }

    /// Block until this thread holds the file exclusively.
    pub fn lock_exclusive(&self) -> Result<()> {
        self.local.lock_exclusive();
        if let Err(e) = platform::lock_file(self.raw(), true, true) {
            unsafe { self.local.unlock_exclusive() };
            return Err(e);
        }
        Ok(())
    }

    /// Take the file exclusively if nobody, in this process or another,
    /// holds it.
    pub fn try_lock_exclusive(&self) -> Result<bool> {
        if !self.local.try_lock_exclusive() {
            return Ok(false);
        }
        match platform::lock_file(self.raw(), true, false) {
            Ok(true) => Ok(true),
            other => {
                unsafe { self.local.unlock_exclusive() };
                other
            }
        }
    }

    /// Block until this thread holds the file shared.
    pub fn lock_shared(&self) -> Result<()> {
        self.local.lock_shared();
        let mut readers = self.readers.lock();
        if *readers == 0 {
            if let Err(e) = platform::lock_file(self.raw(), false, true) {
                drop(readers);
                unsafe { self.local.unlock_shared() };
                return Err(e);
            }
        }
        *readers += 1;
        Ok(())
    }

    /// Take the file shared if no writer holds it.
    ///
    /// Never waits: a reader of this handle still blocked acquiring the OS
    /// lock counts as contention.
    pub fn try_lock_shared(&self) -> Result<bool> {
        if !self.local.try_lock_shared() {
            return Ok(false);
        }
        let Some(mut readers) = self.readers.try_lock() else {
            unsafe { self.local.unlock_shared() };
            return Ok(false);
        };
        if *readers == 0 {
            match platform::lock_file(self.raw(), false, false) {
                Ok(true) => {}
                other => {
                    drop(readers);
                    unsafe { self.local.unlock_shared() };
                    return other;
                }
            }
        }
        *readers += 1;
        Ok(true)
    }

    /// Release whichever lock this thread holds.
    pub fn unlock(&self) -> Result<()> {
        if self.local.is_locked_exclusive() {
            let result = platform::unlock_file(self.raw());
            unsafe { self.local.unlock_exclusive() };
            return result;
        }
        let mut readers = self.readers.lock();
        if *readers == 0 {
            debug_assert!(false, "unlock of a file mutex that is not locked");
            return Err(Error::InvalidArgument("file mutex is not locked"));
        }
        *readers -= 1;
        let result = if *readers == 0 {
            platform::unlock_file(self.raw())
        } else {
            Ok(())
        };
        drop(readers);
        unsafe { self.local.unlock_shared() };
        result
    }
}

impl Drop for FileMutex {
    fn drop(&mut self) {
        debug_assert!(!self.local.is_locked(), "file mutex dropped while locked");
    }
}

impl std::fmt::Debug for FileMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMutex").field("path", &self.path).finish()
    }
}
