// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the named-object primitives.
//
// Named objects are kernel objects. The kernel resolves creation races itself
// (CreateXxxW opens the existing object), and an object lives until its last
// handle is closed, so `clear` has nothing to do here.

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::time::{Duration, Instant};

use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_LOCK_VIOLATION, FALSE, HANDLE, INVALID_HANDLE_VALUE, TRUE,
    WAIT_ABANDONED, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Security::{
    InitializeSecurityDescriptor, SetSecurityDescriptorDacl, SECURITY_ATTRIBUTES,
    SECURITY_DESCRIPTOR,
};

use crate::error::{Error, Result};
use crate::handle::{NativeHandle, RawNative};

const MUTEX_SUFFIX: &str = ".sync_global_mutex_1";
const EVENT_SUFFIX: &str = ".sync_global_event_1";

const SECURITY_DESCRIPTOR_REVISION: u32 = 1;

/// Encode a name as a null-terminated wide string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Security attributes with a null DACL, so every session and user can open
/// the object. Boxed: the attributes point into the descriptor.
struct OpenSecurity {
    _descriptor: Box<SECURITY_DESCRIPTOR>,
    attributes: SECURITY_ATTRIBUTES,
}

impl OpenSecurity {
    fn new() -> Result<Self> {
        let mut descriptor: Box<SECURITY_DESCRIPTOR> = Box::new(unsafe { mem::zeroed() });
        let psd = ptr::addr_of_mut!(*descriptor).cast::<c_void>();
        unsafe {
            if InitializeSecurityDescriptor(psd, SECURITY_DESCRIPTOR_REVISION) == 0 {
                return Err(Error::last_os("InitializeSecurityDescriptor"));
            }
            if SetSecurityDescriptorDacl(psd, TRUE, ptr::null(), FALSE) == 0 {
                return Err(Error::last_os("SetSecurityDescriptorDacl"));
            }
        }
        let attributes = SECURITY_ATTRIBUTES {
            nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: psd,
            bInheritHandle: FALSE,
        };
        Ok(Self {
            _descriptor: descriptor,
            attributes,
        })
    }

    fn as_ptr(&self) -> *const SECURITY_ATTRIBUTES {
        &self.attributes
    }
}

// ---------------------------------------------------------------------------
// Memory mapping
// ---------------------------------------------------------------------------

pub fn system_alignment() -> usize {
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    let mut info: SYSTEM_INFO = unsafe { mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    info.dwAllocationGranularity as usize
}

pub fn map_region(handle: RawNative, len: usize, offset: u64, read_only: bool) -> Result<*mut u8> {
    use windows_sys::Win32::System::Memory::{MapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE};

    let access = if read_only {
        FILE_MAP_READ
    } else {
        FILE_MAP_READ | FILE_MAP_WRITE
    };
    let view = unsafe {
        MapViewOfFile(handle, access, (offset >> 32) as u32, offset as u32, len)
    };
    if view.Value.is_null() {
        return Err(Error::last_os("MapViewOfFile"));
    }
    Ok(view.Value.cast())
}

/// # Safety
/// `base` must be a view returned by `map_region`.
pub unsafe fn unmap_region(base: *mut u8, _len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};

    let view = MEMORY_MAPPED_VIEW_ADDRESS { Value: base.cast() };
    if UnmapViewOfFile(view) == 0 {
        return Err(Error::last_os("UnmapViewOfFile"));
    }
    Ok(())
}

/// # Safety
/// `base..base+len` must lie in a live view returned by `map_region`.
pub unsafe fn flush_region(base: *mut u8, len: usize) -> Result<()> {
    use windows_sys::Win32::System::Memory::FlushViewOfFile;

    if FlushViewOfFile(base.cast_const().cast(), len) == 0 {
        return Err(Error::last_os("FlushViewOfFile"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PlatformShm: pagefile-backed file mapping
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    handle: NativeHandle,
    size: u64,
}

impl PlatformShm {
    pub fn open_or_create(name: &str, size: u64, read_only: bool) -> Result<Self> {
        use windows_sys::Win32::System::Memory::{
            CreateFileMappingW, PAGE_READONLY, PAGE_READWRITE, SEC_COMMIT,
        };

        let security = OpenSecurity::new()?;
        let wide = to_wide(name);
        let protect = if read_only { PAGE_READONLY } else { PAGE_READWRITE };
        let raw = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                security.as_ptr(),
                protect | SEC_COMMIT,
                (size >> 32) as u32,
                size as u32,
                wide.as_ptr(),
            )
        };
        let handle = NativeHandle::check("CreateFileMappingW", raw)?;
        Ok(Self { handle, size })
    }

    pub fn open(name: &str, read_only: bool) -> Result<Self> {
        use windows_sys::Win32::System::Memory::{
            OpenFileMappingW, FILE_MAP_READ, FILE_MAP_WRITE,
        };

        let wide = to_wide(name);
        let access = if read_only {
            FILE_MAP_READ
        } else {
            FILE_MAP_READ | FILE_MAP_WRITE
        };
        let raw = unsafe { OpenFileMappingW(access, FALSE, wide.as_ptr()) };
        let handle = NativeHandle::check("OpenFileMappingW", raw)?;
        let size = mapping_size(&handle)?;
        Ok(Self { handle, size })
    }

    pub fn unlink(_name: &str) -> Result<()> {
        Ok(())
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Size of an existing section, rounded to pages by the kernel.
fn mapping_size(handle: &NativeHandle) -> Result<u64> {
    use windows_sys::Win32::System::Memory::{VirtualQuery, MEMORY_BASIC_INFORMATION};

    let base = map_region(handle.as_raw(), 0, 0, true)?;
    let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
    let ret = unsafe {
        VirtualQuery(
            base.cast_const().cast(),
            &mut info,
            mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    let result = if ret == 0 {
        Err(Error::last_os("VirtualQuery"))
    } else {
        Ok(info.RegionSize as u64)
    };
    if let Err(e) = unsafe { unmap_region(base, 0) } {
        tracing::warn!(error = %e, "failed to unmap size probe view");
    }
    result
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

enum Wait {
    Signaled,
    Abandoned,
    TimedOut,
}

fn wait_one(handle: HANDLE, ms: u32) -> Result<Wait> {
    use windows_sys::Win32::System::Threading::WaitForSingleObject;

    match unsafe { WaitForSingleObject(handle, ms) } {
        WAIT_OBJECT_0 => Ok(Wait::Signaled),
        WAIT_ABANDONED => Ok(Wait::Abandoned),
        WAIT_TIMEOUT => Ok(Wait::TimedOut),
        WAIT_FAILED => Err(Error::last_os("WaitForSingleObject")),
        _ => Err(Error::InvalidArgument("unexpected wait result")),
    }
}

/// Milliseconds for one wait slice, rounded up so a slice never ends early.
fn wait_millis(remaining: Duration) -> u32 {
    use windows_sys::Win32::System::Threading::INFINITE;

    let ms = remaining.as_nanos().div_ceil(1_000_000);
    ms.min(u128::from(INFINITE - 1)) as u32
}

/// Wait on `handle` until signalled or `timeout` has passed.
fn wait_deadline(handle: HANDLE, timeout: Duration) -> Result<Wait> {
    let Some(deadline) = Instant::now().checked_add(timeout) else {
        return wait_one(handle, windows_sys::Win32::System::Threading::INFINITE);
    };
    loop {
        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        match wait_one(handle, wait_millis(remaining))? {
            Wait::TimedOut if Instant::now() < deadline => continue,
            other => return Ok(other),
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex: named kernel mutex
// ---------------------------------------------------------------------------

pub struct PlatformMutex {
    handle: NativeHandle,
}

impl PlatformMutex {
    pub fn open_or_create(name: &str) -> Result<Self> {
        use windows_sys::Win32::System::Threading::CreateMutexW;

        let security = OpenSecurity::new()?;
        let wide = to_wide(&format!("{name}{MUTEX_SUFFIX}"));
        let raw = unsafe { CreateMutexW(security.as_ptr(), FALSE, wide.as_ptr()) };
        let handle = NativeHandle::check("CreateMutexW", raw)?;
        Ok(Self { handle })
    }

    pub fn open(name: &str) -> Result<Self> {
        use windows_sys::Win32::System::Threading::{OpenMutexW, MUTEX_ALL_ACCESS};

        let wide = to_wide(&format!("{name}{MUTEX_SUFFIX}"));
        let raw = unsafe { OpenMutexW(MUTEX_ALL_ACCESS, FALSE, wide.as_ptr()) };
        let handle = NativeHandle::check("OpenMutexW", raw)?;
        Ok(Self { handle })
    }

    pub fn clear(_name: &str) -> Result<()> {
        Ok(())
    }

    pub fn lock(&self) -> Result<()> {
        use windows_sys::Win32::System::Threading::INFINITE;

        match wait_one(self.handle.as_raw(), INFINITE)? {
            Wait::Signaled => Ok(()),
            Wait::Abandoned => {
                tracing::warn!("previous owner died holding a global mutex");
                Ok(())
            }
            Wait::TimedOut => Err(Error::InvalidArgument("infinite wait timed out")),
        }
    }

    pub fn try_lock(&self) -> Result<bool> {
        match wait_one(self.handle.as_raw(), 0)? {
            Wait::Signaled => Ok(true),
            Wait::Abandoned => {
                tracing::warn!("previous owner died holding a global mutex");
                Ok(true)
            }
            Wait::TimedOut => Ok(false),
        }
    }

    pub fn unlock(&self) -> Result<()> {
        use windows_sys::Win32::System::Threading::ReleaseMutex;

        if unsafe { ReleaseMutex(self.handle.as_raw()) } == 0 {
            return Err(Error::last_os("ReleaseMutex"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PlatformEvent: named kernel event
// ---------------------------------------------------------------------------

pub struct PlatformEvent {
    handle: NativeHandle,
    manual: bool,
}

impl PlatformEvent {
    pub fn open_or_create(name: &str, manual: bool) -> Result<Self> {
        use windows_sys::Win32::System::Threading::CreateEventW;

        let security = OpenSecurity::new()?;
        let wide = to_wide(&format!("{name}{EVENT_SUFFIX}"));
        let manual_flag = if manual { TRUE } else { FALSE };
        let raw = unsafe { CreateEventW(security.as_ptr(), manual_flag, FALSE, wide.as_ptr()) };
        let handle = NativeHandle::check("CreateEventW", raw)?;
        Ok(Self { handle, manual })
    }

    /// The kernel does not report an existing event's reset mode; an opened
    /// event reports auto-reset.
    pub fn open(name: &str) -> Result<Self> {
        use windows_sys::Win32::System::Threading::{OpenEventW, EVENT_ALL_ACCESS};

        let wide = to_wide(&format!("{name}{EVENT_SUFFIX}"));
        let raw = unsafe { OpenEventW(EVENT_ALL_ACCESS, FALSE, wide.as_ptr()) };
        let handle = NativeHandle::check("OpenEventW", raw)?;
        Ok(Self {
            handle,
            manual: false,
        })
    }

    pub fn clear(_name: &str) -> Result<()> {
        Ok(())
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn set(&self) -> Result<()> {
        use windows_sys::Win32::System::Threading::SetEvent;

        if unsafe { SetEvent(self.handle.as_raw()) } == 0 {
            return Err(Error::last_os("SetEvent"));
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        use windows_sys::Win32::System::Threading::ResetEvent;

        if unsafe { ResetEvent(self.handle.as_raw()) } == 0 {
            return Err(Error::last_os("ResetEvent"));
        }
        Ok(())
    }

    pub fn wait(&self) -> Result<()> {
        use windows_sys::Win32::System::Threading::INFINITE;

        match wait_one(self.handle.as_raw(), INFINITE)? {
            Wait::Signaled | Wait::Abandoned => Ok(()),
            Wait::TimedOut => Err(Error::InvalidArgument("infinite wait timed out")),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match wait_deadline(self.handle.as_raw(), timeout)? {
            Wait::Signaled | Wait::Abandoned => Ok(true),
            Wait::TimedOut => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Advisory whole-file lock
// ---------------------------------------------------------------------------

fn whole_file_overlapped() -> windows_sys::Win32::System::IO::OVERLAPPED {
    unsafe { mem::zeroed() }
}

/// Take a LockFileEx lock over the whole file. With `block == false` returns
/// `Ok(false)` instead of waiting.
pub fn lock_file(handle: RawNative, exclusive: bool, block: bool) -> Result<bool> {
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    let mut flags = 0;
    if exclusive {
        flags |= LOCKFILE_EXCLUSIVE_LOCK;
    }
    if !block {
        flags |= LOCKFILE_FAIL_IMMEDIATELY;
    }
    let mut overlapped = whole_file_overlapped();
    if unsafe { LockFileEx(handle, flags, 0, u32::MAX, u32::MAX, &mut overlapped) } != 0 {
        return Ok(true);
    }
    if !block && unsafe { GetLastError() } == ERROR_LOCK_VIOLATION {
        return Ok(false);
    }
    Err(Error::last_os("LockFileEx"))
}

pub fn unlock_file(handle: RawNative) -> Result<()> {
    use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;

    let mut overlapped = whole_file_overlapped();
    if unsafe { UnlockFileEx(handle, 0, u32::MAX, u32::MAX, &mut overlapped) } == 0 {
        return Err(Error::last_os("UnlockFileEx"));
    }
    Ok(())
}
