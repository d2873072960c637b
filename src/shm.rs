// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named shared memory.
// Delegates to platform::PlatformShm (Linux or Windows).

use crate::error::{Error, Result};
use crate::handle::NativeHandle;
use crate::mapping::MemoryMapping;
use crate::name;
use crate::platform::PlatformShm;

/// A named, inter-process shared memory segment.
///
/// The segment itself is not mapped; call [`SharedMemory::map`] for a view.
/// On Linux the segment outlives every handle until [`SharedMemory::clear`]
/// removes its name; on Windows it disappears with the last handle.
pub struct SharedMemory {
    name: String,
    inner: PlatformShm,
    read_only: bool,
}

impl SharedMemory {
    /// Open the segment `name`, creating it with `size` bytes if it does not
    /// exist yet. Concurrent creators all end up on the same segment.
    pub fn open_or_create(name: &str, size: u64, read_only: bool) -> Result<Self> {
        name::validate(name)?;
        if size == 0 {
            return Err(Error::InvalidArgument("shared memory size is 0"));
        }

        #[cfg(target_os = "linux")]
        {
            match Self::open(name, read_only) {
                Ok(shm) => return Ok(shm),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            let (mut shm, _) = Self::create_published(name, size, |_| Ok(()))?;
            shm.read_only = read_only;
            Ok(shm)
        }

        #[cfg(windows)]
        {
            let inner = PlatformShm::open_or_create(name, size, read_only)?;
            tracing::debug!(name, size, "opened or created shared memory");
            Ok(Self {
                name: name.to_string(),
                inner,
                read_only,
            })
        }
    }

    /// Open an existing segment.
    pub fn open(name: &str, read_only: bool) -> Result<Self> {
        name::validate(name)?;
        let inner = PlatformShm::open(name, read_only)?;
        Ok(Self {
            name: name.to_string(),
            inner,
            read_only,
        })
    }

    /// Create a fresh segment under a temporary name, run `init` on it, then
    /// publish it as `name`. Returns the segment now known as `name` and
    /// whether it is the one this call created. A losing creator gets the
    /// winner's segment and its own is discarded uninitialised.
    #[cfg(target_os = "linux")]
    pub(crate) fn create_published<F>(name: &str, size: u64, init: F) -> Result<(Self, bool)>
    where
        F: FnOnce(&SharedMemory) -> Result<()>,
    {
        let temp = name::temp_name(name::TEMP_SHM_SUFFIX);
        let inner = PlatformShm::create_exclusive(&temp, size)?;
        let _unlink = TempName(&temp);

        let fresh = Self {
            name: temp.clone(),
            inner,
            read_only: false,
        };
        init(&fresh)?;

        if PlatformShm::publish(&temp, name)? {
            tracing::debug!(name, size, "created shared object");
            return Ok((
                Self {
                    name: name.to_string(),
                    ..fresh
                },
                true,
            ));
        }
        tracing::debug!(name, "lost creation race, opening existing object");
        let inner = PlatformShm::open(name, false)?;
        Ok((
            Self {
                name: name.to_string(),
                inner,
                read_only: false,
            },
            false,
        ))
    }

    /// Remove the name `name`. Existing handles and mappings stay valid.
    /// A missing segment is not an error. No-op on Windows.
    pub fn clear(name: &str) -> Result<()> {
        name::validate(name)?;
        match PlatformShm::unlink(name) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Map `size` bytes at `offset`. A read-only segment only yields
    /// read-only mappings. The range must lie within the segment.
    pub fn map(&self, size: usize, offset: u64, read_only: bool) -> Result<MemoryMapping> {
        let end = offset
            .checked_add(size as u64)
            .ok_or(Error::InvalidArgument("mapping range overflows"))?;
        if end > self.size() {
            return Err(Error::InvalidArgument("mapping extends past the end of the segment"));
        }
        MemoryMapping::map(self.inner.handle(), size, offset, read_only || self.read_only)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the backing object in bytes.
    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    pub fn handle(&self) -> &NativeHandle {
        self.inner.handle()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Unlinks a temporary object name when dropped.
#[cfg(target_os = "linux")]
struct TempName<'a>(&'a str);

#[cfg(target_os = "linux")]
impl Drop for TempName<'_> {
    fn drop(&mut self) {
        if let Err(e) = PlatformShm::unlink(self.0) {
            tracing::warn!(name = self.0, error = %e, "failed to remove temporary object");
        }
    }
}
