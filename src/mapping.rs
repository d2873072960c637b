// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// A view of a native handle's bytes mapped into this address space.

use std::ptr;

use crate::error::{Error, Result};
use crate::handle::NativeHandle;
use crate::platform;

/// Page size (Linux) or allocation granularity (Windows): the unit mapping
/// offsets must be aligned to.
pub fn system_alignment() -> usize {
    platform::system_alignment()
}

/// Split `offset` into the aligned offset passed to the OS and the distance
/// from there to the requested byte.
fn align_offset(offset: u64, alignment: usize) -> (u64, usize) {
    let rem = (offset % alignment as u64) as usize;
    (offset - rem as u64, rem)
}

/// An owned mapping of `len()` bytes starting at an arbitrary offset.
///
/// The OS region starts at the aligned offset below the requested one; the
/// pointers exposed here are advanced past that slack. Unmapped on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    base: *mut u8,
    mapped_len: usize,
    rem: usize,
    len: usize,
    read_only: bool,
}

// Safety: the mapping is plain memory; synchronisation of its contents is
// the caller's business, as for any shared segment.
unsafe impl Send for MemoryMapping {}
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    /// Map `size` bytes of `handle` starting at byte `offset`.
    pub fn map(handle: &NativeHandle, size: usize, offset: u64, read_only: bool) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("mapping size is 0"));
        }
        let (aligned, rem) = align_offset(offset, system_alignment());
        let mapped_len = size
            .checked_add(rem)
            .ok_or(Error::InvalidArgument("mapping size overflows"))?;
        let base = platform::map_region(handle.as_raw(), mapped_len, aligned, read_only)?;
        Ok(Self {
            base,
            mapped_len,
            rem,
            len: size,
            read_only,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data()
    }

    fn data(&self) -> *mut u8 {
        if self.base.is_null() {
            return ptr::null_mut();
        }
        unsafe { self.base.add(self.rem) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn check_range(&self, offset: usize, n: usize) -> Result<()> {
        if self.base.is_null() {
            return Err(Error::InvalidArgument("mapping has been unmapped"));
        }
        match offset.checked_add(n) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::InvalidArgument("access outside the mapping")),
        }
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        unsafe { ptr::copy_nonoverlapping(self.data().add(offset), buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    /// Copy `buf` into the mapping starting at `offset`.
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidArgument("mapping is read-only"));
        }
        self.check_range(offset, buf.len())?;
        unsafe { ptr::copy_nonoverlapping(buf.as_ptr(), self.data().add(offset), buf.len()) };
        Ok(())
    }

    /// Write dirty pages of the whole mapped range back to the object.
    pub fn flush(&self) -> Result<()> {
        if self.base.is_null() {
            return Ok(());
        }
        unsafe { platform::flush_region(self.base, self.mapped_len) }
    }

    /// Unmap now instead of on drop. Further accesses fail.
    pub fn unmap(&mut self) -> Result<()> {
        if self.base.is_null() {
            return Ok(());
        }
        let base = std::mem::replace(&mut self.base, ptr::null_mut());
        let len = std::mem::take(&mut self.mapped_len);
        self.len = 0;
        unsafe { platform::unmap_region(base, len) }
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            tracing::warn!(error = %e, "failed to unmap memory mapping");
        }
    }
}
