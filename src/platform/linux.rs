// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Linux implementation of the named-object primitives.
//
// Named objects are plain files in the shared memory directory (/dev/shm by
// default, see `Config`). New objects are created under a unique temporary
// name, fully initialised, then published with link(2), which fails with
// EEXIST instead of overwriting. Whoever loses that race opens the winner's
// object, so an opener never observes a half-initialised record.

use std::ffi::CString;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handle::{NativeHandle, RawNative};
use crate::mapping::MemoryMapping;
use crate::process::{self, Pid};
use crate::shm::SharedMemory;

const MUTEX_SUFFIX: &str = ".sync_global_mutex_1";
const EVENT_SUFFIX: &str = ".sync_global_event_1";

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::InvalidArgument("path contains a NUL byte"))
}

// ---------------------------------------------------------------------------
// Memory mapping
// ---------------------------------------------------------------------------

pub fn system_alignment() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}

pub fn map_region(fd: RawNative, len: usize, offset: u64, read_only: bool) -> Result<*mut u8> {
    let prot = if read_only {
        libc::PROT_READ
    } else {
        libc::PROT_READ | libc::PROT_WRITE
    };
    let offset =
        libc::off_t::try_from(offset).map_err(|_| Error::InvalidArgument("offset out of range"))?;
    let mem = unsafe { libc::mmap(ptr::null_mut(), len, prot, libc::MAP_SHARED, fd, offset) };
    if mem == libc::MAP_FAILED {
        return Err(Error::last_os("mmap"));
    }
    Ok(mem.cast())
}

/// # Safety
/// `base..base+len` must be a region returned by `map_region`.
pub unsafe fn unmap_region(base: *mut u8, len: usize) -> Result<()> {
    if libc::munmap(base.cast(), len) != 0 {
        return Err(Error::last_os("munmap"));
    }
    Ok(())
}

/// # Safety
/// `base..base+len` must be a live region returned by `map_region`.
pub unsafe fn flush_region(base: *mut u8, len: usize) -> Result<()> {
    if libc::msync(base.cast(), len, libc::MS_SYNC) != 0 {
        return Err(Error::last_os("msync"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PlatformShm: a file descriptor on a shared memory object
// ---------------------------------------------------------------------------

pub struct PlatformShm {
    handle: NativeHandle,
    size: u64,
}

impl PlatformShm {
    /// Open an existing object.
    pub fn open(name: &str, read_only: bool) -> Result<Self> {
        let path = c_path(&Config::global().shm_path(name))?;
        let access = if read_only { libc::O_RDONLY } else { libc::O_RDWR };
        let fd = unsafe { libc::open(path.as_ptr(), access | libc::O_CLOEXEC | libc::O_NOFOLLOW) };
        let handle = NativeHandle::check("open shared memory", fd)?;
        let size = file_size(&handle)?;
        Ok(Self { handle, size })
    }

    /// Create a new object of `size` bytes; fails if `name` exists.
    pub fn create_exclusive(name: &str, size: u64) -> Result<Self> {
        let config = Config::global();
        let path = c_path(&config.shm_path(name))?;
        let perms = config.permissions as libc::mode_t;
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL | libc::O_CLOEXEC | libc::O_NOFOLLOW,
                perms as libc::c_uint,
            )
        };
        let handle = NativeHandle::check("create shared memory", fd)?;
        // umask may have stripped bits that other users need.
        if unsafe { libc::fchmod(handle.as_raw(), perms) } != 0 {
            let err = Error::last_os("fchmod");
            tracing::warn!(name, error = %err, "failed to set shared memory permissions");
        }
        let len =
            libc::off_t::try_from(size).map_err(|_| Error::InvalidArgument("size out of range"))?;
        if unsafe { libc::ftruncate(handle.as_raw(), len) } != 0 {
            let err = Error::last_os("ftruncate");
            let _ = Self::unlink(name);
            return Err(err);
        }
        Ok(Self { handle, size })
    }

    /// Give the object `temp` the additional name `name`.
    /// Returns `Ok(false)` if `name` already exists.
    pub fn publish(temp: &str, name: &str) -> Result<bool> {
        let config = Config::global();
        let from = c_path(&config.shm_path(temp))?;
        let to = c_path(&config.shm_path(name))?;
        if unsafe { libc::link(from.as_ptr(), to.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = Error::last_os("link");
        if err.raw_os_error() == Some(libc::EEXIST) {
            return Ok(false);
        }
        Err(err)
    }

    pub fn unlink(name: &str) -> Result<()> {
        let path = c_path(&Config::global().shm_path(name))?;
        if unsafe { libc::unlink(path.as_ptr()) } != 0 {
            return Err(Error::last_os("unlink shared memory"));
        }
        Ok(())
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn file_size(handle: &NativeHandle) -> Result<u64> {
    let mut st: libc::stat = unsafe { mem::zeroed() };
    if unsafe { libc::fstat(handle.as_raw(), &mut st) } != 0 {
        return Err(Error::last_os("fstat"));
    }
    Ok(st.st_size as u64)
}

/// Open the record object `object`, or create, initialise and publish it.
fn open_or_create_record<F>(object: &str, size: usize, init: F) -> Result<MemoryMapping>
where
    F: FnOnce(*mut u8) -> Result<()>,
{
    match open_record(object, size) {
        Ok(mapping) => return Ok(mapping),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    let (memory, _) = SharedMemory::create_published(object, size as u64, |temp| {
        let mut mapping = temp.map(size, 0, false)?;
        init(mapping.as_mut_ptr())
    })?;
    memory.map(size, 0, false)
}

fn open_record(object: &str, size: usize) -> Result<MemoryMapping> {
    let shm = PlatformShm::open(object, false)?;
    if shm.size() < size as u64 {
        return Err(Error::InvalidArgument("existing object is smaller than its record"));
    }
    MemoryMapping::map(shm.handle(), size, 0, false)
}

// ---------------------------------------------------------------------------
// Robust process-shared pthread mutex
// ---------------------------------------------------------------------------

/// # Safety
/// `mtx` must point to writable memory large enough for a `pthread_mutex_t`.
unsafe fn init_robust_mutex(mtx: *mut libc::pthread_mutex_t) -> Result<()> {
    ptr::write_bytes(mtx, 0, 1);

    let mut attr: libc::pthread_mutexattr_t = mem::zeroed();
    let mut eno = libc::pthread_mutexattr_init(&mut attr);
    if eno != 0 {
        return Err(Error::from_errno("pthread_mutexattr_init", eno));
    }
    eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno == 0 {
        eno = libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);
    }
    if eno == 0 {
        eno = libc::pthread_mutex_init(mtx, &attr);
    }
    libc::pthread_mutexattr_destroy(&mut attr);
    if eno != 0 {
        return Err(Error::from_errno("pthread_mutex_init", eno));
    }
    Ok(())
}

/// The previous owner died holding the lock. We own it now; mark it usable
/// again. Whatever state it protected is left as the dead owner wrote it.
fn recover_owner_dead(mtx: *mut libc::pthread_mutex_t) -> Result<()> {
    tracing::warn!("previous owner died holding a robust mutex, marking it consistent");
    let eno = unsafe { libc::pthread_mutex_consistent(mtx) };
    if eno != 0 {
        return Err(Error::from_errno("pthread_mutex_consistent", eno));
    }
    Ok(())
}

fn lock_raw(mtx: *mut libc::pthread_mutex_t) -> Result<()> {
    match unsafe { libc::pthread_mutex_lock(mtx) } {
        0 => Ok(()),
        libc::EOWNERDEAD => recover_owner_dead(mtx),
        eno => Err(Error::from_errno("pthread_mutex_lock", eno)),
    }
}

fn try_lock_raw(mtx: *mut libc::pthread_mutex_t) -> Result<bool> {
    match unsafe { libc::pthread_mutex_trylock(mtx) } {
        0 => Ok(true),
        libc::EBUSY => Ok(false),
        libc::EOWNERDEAD => recover_owner_dead(mtx).map(|()| true),
        eno => Err(Error::from_errno("pthread_mutex_trylock", eno)),
    }
}

fn unlock_raw(mtx: *mut libc::pthread_mutex_t) -> Result<()> {
    match unsafe { libc::pthread_mutex_unlock(mtx) } {
        0 => Ok(()),
        eno => Err(Error::from_errno("pthread_mutex_unlock", eno)),
    }
}

// ---------------------------------------------------------------------------
// PlatformMutex
// ---------------------------------------------------------------------------

#[repr(C)]
struct MutexRecord {
    mutex: libc::pthread_mutex_t,
}

pub struct PlatformMutex {
    mapping: MemoryMapping,
}

// Safety: the record is a process-shared pthread mutex.
unsafe impl Send for PlatformMutex {}
unsafe impl Sync for PlatformMutex {}

impl PlatformMutex {
    pub fn open_or_create(name: &str) -> Result<Self> {
        let object = format!("{name}{MUTEX_SUFFIX}");
        let mapping = open_or_create_record(&object, mem::size_of::<MutexRecord>(), |base| unsafe {
            init_robust_mutex(ptr::addr_of_mut!((*base.cast::<MutexRecord>()).mutex))
        })?;
        Ok(Self { mapping })
    }

    pub fn open(name: &str) -> Result<Self> {
        let object = format!("{name}{MUTEX_SUFFIX}");
        let mapping = open_record(&object, mem::size_of::<MutexRecord>())?;
        Ok(Self { mapping })
    }

    pub fn clear(name: &str) -> Result<()> {
        PlatformShm::unlink(&format!("{name}{MUTEX_SUFFIX}"))
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        let record = self.mapping.as_ptr() as *mut MutexRecord;
        unsafe { ptr::addr_of_mut!((*record).mutex) }
    }

    pub fn lock(&self) -> Result<()> {
        lock_raw(self.mtx_ptr())
    }

    pub fn try_lock(&self) -> Result<bool> {
        try_lock_raw(self.mtx_ptr())
    }

    pub fn unlock(&self) -> Result<()> {
        unlock_raw(self.mtx_ptr())
    }
}

// ---------------------------------------------------------------------------
// PlatformEvent: mutex + monotonic condvar + state in one shared record
// ---------------------------------------------------------------------------

#[repr(C, align(8))]
struct EventRecord {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    state: bool,
    manual: bool,
    // Written once before the record is published.
    pid: u64,
    start_tick: u64,
}

/// Holds the record mutex; unlocks on drop.
struct RecordGuard {
    mtx: *mut libc::pthread_mutex_t,
}

impl RecordGuard {
    fn lock(mtx: *mut libc::pthread_mutex_t) -> Result<Self> {
        lock_raw(mtx)?;
        Ok(Self { mtx })
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        if let Err(e) = unlock_raw(self.mtx) {
            tracing::warn!(error = %e, "failed to unlock event record");
        }
    }
}

pub struct PlatformEvent {
    mapping: MemoryMapping,
}

// Safety: every mutable field is only touched under the record's
// process-shared mutex.
unsafe impl Send for PlatformEvent {}
unsafe impl Sync for PlatformEvent {}

impl PlatformEvent {
    pub fn open_or_create(name: &str, manual: bool) -> Result<Self> {
        let object = format!("{name}{EVENT_SUFFIX}");
        let mapping = open_or_create_record(&object, mem::size_of::<EventRecord>(), |base| unsafe {
            init_event_record(base.cast(), manual)
        })?;
        Ok(Self { mapping })
    }

    pub fn open(name: &str) -> Result<Self> {
        let object = format!("{name}{EVENT_SUFFIX}");
        let mapping = open_record(&object, mem::size_of::<EventRecord>())?;
        Ok(Self { mapping })
    }

    pub fn clear(name: &str) -> Result<()> {
        PlatformShm::unlink(&format!("{name}{EVENT_SUFFIX}"))
    }

    fn record(&self) -> *mut EventRecord {
        self.mapping.as_ptr() as *mut EventRecord
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { ptr::addr_of_mut!((*self.record()).mutex) }
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        unsafe { ptr::addr_of_mut!((*self.record()).cond) }
    }

    pub fn is_manual(&self) -> bool {
        unsafe { (*self.record()).manual }
    }

    pub fn set(&self) -> Result<()> {
        let _guard = RecordGuard::lock(self.mtx_ptr())?;
        unsafe { (*self.record()).state = true };
        match unsafe { libc::pthread_cond_broadcast(self.cond_ptr()) } {
            0 => Ok(()),
            eno => Err(Error::from_errno("pthread_cond_broadcast", eno)),
        }
    }

    pub fn reset(&self) -> Result<()> {
        let _guard = RecordGuard::lock(self.mtx_ptr())?;
        unsafe { (*self.record()).state = false };
        Ok(())
    }

    /// Must be called with the record mutex held and state observed true.
    fn consume(&self) {
        unsafe {
            let record = self.record();
            if !(*record).manual {
                (*record).state = false;
            }
        }
    }

    fn state(&self) -> bool {
        unsafe { (*self.record()).state }
    }

    pub fn wait(&self) -> Result<()> {
        let _guard = RecordGuard::lock(self.mtx_ptr())?;
        while !self.state() {
            match unsafe { libc::pthread_cond_wait(self.cond_ptr(), self.mtx_ptr()) } {
                0 => {}
                libc::EOWNERDEAD => recover_owner_dead(self.mtx_ptr())?,
                eno => return Err(Error::from_errno("pthread_cond_wait", eno)),
            }
        }
        self.consume();
        Ok(())
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait().map(|()| true);
        };
        let _guard = RecordGuard::lock(self.mtx_ptr())?;
        while !self.state() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let abs = monotonic_after(deadline - now);
            match unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), self.mtx_ptr(), &abs) } {
                // Signalled, spurious or timed out: the loop re-checks state
                // first, then the remaining time.
                0 | libc::ETIMEDOUT => {}
                libc::EOWNERDEAD => recover_owner_dead(self.mtx_ptr())?,
                eno => return Err(Error::from_errno("pthread_cond_timedwait", eno)),
            }
        }
        self.consume();
        Ok(true)
    }

    /// PID of the creating process, if that exact process is still alive.
    pub fn alive_creator(&self) -> Result<Pid> {
        let (pid, tick) = unsafe {
            let record = self.record();
            ((*record).pid, (*record).start_tick)
        };
        let pid = Pid::try_from(pid).map_err(|_| Error::InvalidArgument("corrupt creator pid"))?;
        if process::start_tick(pid)? == tick {
            Ok(pid)
        } else {
            Err(Error::ProcessNotFound(pid))
        }
    }
}

/// # Safety
/// `record` must point to writable, zero-or-garbage memory of record size
/// that no other thread or process can see yet.
unsafe fn init_event_record(record: *mut EventRecord, manual: bool) -> Result<()> {
    ptr::write_bytes(record, 0, 1);
    init_robust_mutex(ptr::addr_of_mut!((*record).mutex))?;

    let cond = ptr::addr_of_mut!((*record).cond);
    let mut attr: libc::pthread_condattr_t = mem::zeroed();
    let mut eno = libc::pthread_condattr_init(&mut attr);
    if eno != 0 {
        return Err(Error::from_errno("pthread_condattr_init", eno));
    }
    eno = libc::pthread_condattr_setclock(&mut attr, libc::CLOCK_MONOTONIC);
    if eno == 0 {
        eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    }
    if eno == 0 {
        eno = libc::pthread_cond_init(cond, &attr);
    }
    libc::pthread_condattr_destroy(&mut attr);
    if eno != 0 {
        return Err(Error::from_errno("pthread_cond_init", eno));
    }

    let pid = process::current_pid();
    (*record).state = false;
    (*record).manual = manual;
    (*record).pid = u64::from(pid);
    (*record).start_tick = process::start_tick(pid)?;
    Ok(())
}

/// Absolute CLOCK_MONOTONIC time `after` from now.
fn monotonic_after(after: Duration) -> libc::timespec {
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    let total_nsec = now.tv_nsec as u64 + u64::from(after.subsec_nanos());
    let secs = (now.tv_sec as u64)
        .saturating_add(after.as_secs())
        .saturating_add(total_nsec / 1_000_000_000);
    libc::timespec {
        tv_sec: secs.min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: (total_nsec % 1_000_000_000) as libc::c_long,
    }
}

// ---------------------------------------------------------------------------
// Advisory whole-file lock
// ---------------------------------------------------------------------------

/// Take an flock(2) lock on `fd`. With `block == false` returns `Ok(false)`
/// instead of waiting.
pub fn lock_file(fd: RawNative, exclusive: bool, block: bool) -> Result<bool> {
    let mut op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
    if !block {
        op |= libc::LOCK_NB;
    }
    loop {
        if unsafe { libc::flock(fd, op) } == 0 {
            return Ok(true);
        }
        let err = Error::last_os("flock");
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(libc::EWOULDBLOCK) if !block => return Ok(false),
            _ => return Err(err),
        }
    }
}

pub fn unlock_file(fd: RawNative) -> Result<()> {
    loop {
        if unsafe { libc::flock(fd, libc::LOCK_UN) } == 0 {
            return Ok(());
        }
        let err = Error::last_os("flock(LOCK_UN)");
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let page = system_alignment();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn monotonic_after_normalises_nanoseconds() {
        let ts = monotonic_after(Duration::from_nanos(1_999_999_999));
        assert!(ts.tv_nsec >= 0 && ts.tv_nsec < 1_000_000_000);
    }

    #[test]
    fn event_record_is_eight_byte_aligned() {
        assert_eq!(mem::align_of::<EventRecord>(), 8);
        assert_eq!(mem::size_of::<EventRecord>() % 8, 0);
    }

    fn record_name(tag: &str) -> String {
        format!("libsync_unit_{tag}_{}", std::process::id())
    }

    #[test]
    fn alive_creator_reports_this_process() {
        let name = record_name("creator");
        let _ = PlatformEvent::clear(&name);
        let event = PlatformEvent::open_or_create(&name, false).unwrap();
        assert_eq!(event.alive_creator().unwrap(), process::current_pid());
        PlatformEvent::clear(&name).unwrap();
    }

    #[test]
    fn alive_creator_detects_reused_pid() {
        let name = record_name("reused");
        let _ = PlatformEvent::clear(&name);
        let event = PlatformEvent::open_or_create(&name, false).unwrap();

        // Same pid, different start time: the pid now names another process.
        unsafe { (*event.record()).start_tick += 1 };
        let err = event.alive_creator().unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(pid) if pid == process::current_pid()));
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

        PlatformEvent::clear(&name).unwrap();
    }

    #[test]
    fn alive_creator_detects_exited_process() {
        let name = record_name("exited");
        let _ = PlatformEvent::clear(&name);
        let event = PlatformEvent::open_or_create(&name, false).unwrap();

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        unsafe { (*event.record()).pid = u64::from(dead) };

        let err = event.alive_creator().unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(pid) if pid == dead));

        PlatformEvent::clear(&name).unwrap();
    }
}
