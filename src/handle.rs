// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Owning wrapper around one raw OS descriptor (fd on Linux, HANDLE on Windows).

use crate::error::{Error, Result};

#[cfg(unix)]
pub type RawNative = std::os::fd::RawFd;
#[cfg(windows)]
pub type RawNative = windows_sys::Win32::Foundation::HANDLE;

#[cfg(unix)]
type Owned = std::os::fd::OwnedFd;
#[cfg(windows)]
type Owned = std::os::windows::io::OwnedHandle;

/// Owns one descriptor and closes it on drop.
#[derive(Debug)]
pub struct NativeHandle {
    inner: Owned,
}

impl NativeHandle {
    /// Take ownership of `raw`.
    ///
    /// # Safety
    /// `raw` must be an open descriptor that nothing else closes.
    pub unsafe fn from_raw(raw: RawNative) -> Self {
        #[cfg(unix)]
        let inner = <Owned as std::os::fd::FromRawFd>::from_raw_fd(raw);
        #[cfg(windows)]
        let inner = <Owned as std::os::windows::io::FromRawHandle>::from_raw_handle(raw as _);
        Self { inner }
    }

    /// Wrap the return value of a descriptor-creating call, turning the
    /// platform failure value into the last OS error.
    #[cfg(unix)]
    pub(crate) fn check(op: &'static str, fd: RawNative) -> Result<Self> {
        if fd < 0 {
            return Err(Error::last_os(op));
        }
        Ok(unsafe { Self::from_raw(fd) })
    }

    #[cfg(windows)]
    pub(crate) fn check(op: &'static str, handle: RawNative) -> Result<Self> {
        use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return Err(Error::last_os(op));
        }
        Ok(unsafe { Self::from_raw(handle) })
    }

    pub fn as_raw(&self) -> RawNative {
        #[cfg(unix)]
        {
            std::os::fd::AsRawFd::as_raw_fd(&self.inner)
        }
        #[cfg(windows)]
        {
            std::os::windows::io::AsRawHandle::as_raw_handle(&self.inner) as RawNative
        }
    }

    /// Release ownership without closing.
    pub fn into_raw(self) -> RawNative {
        #[cfg(unix)]
        {
            std::os::fd::IntoRawFd::into_raw_fd(self.inner)
        }
        #[cfg(windows)]
        {
            std::os::windows::io::IntoRawHandle::into_raw_handle(self.inner) as RawNative
        }
    }

    /// Duplicate the descriptor. The copy is close-on-exec / non-inheritable.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = self
            .inner
            .try_clone()
            .map_err(|e| Error::io("duplicate handle", e))?;
        Ok(Self { inner })
    }

    /// Whether child processes inherit the descriptor (clears or sets
    /// FD_CLOEXEC / HANDLE_FLAG_INHERIT).
    #[cfg(unix)]
    pub fn set_inheritable(&self, inheritable: bool) -> Result<()> {
        let fd = self.as_raw();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(Error::last_os("fcntl(F_GETFD)"));
        }
        let new_flags = if inheritable {
            flags & !libc::FD_CLOEXEC
        } else {
            flags | libc::FD_CLOEXEC
        };
        if new_flags != flags && unsafe { libc::fcntl(fd, libc::F_SETFD, new_flags) } < 0 {
            return Err(Error::last_os("fcntl(F_SETFD)"));
        }
        Ok(())
    }

    #[cfg(windows)]
    pub fn set_inheritable(&self, inheritable: bool) -> Result<()> {
        use windows_sys::Win32::Foundation::{SetHandleInformation, HANDLE_FLAG_INHERIT};
        let flags = if inheritable { HANDLE_FLAG_INHERIT } else { 0 };
        if unsafe { SetHandleInformation(self.as_raw(), HANDLE_FLAG_INHERIT, flags) } == 0 {
            return Err(Error::last_os("SetHandleInformation"));
        }
        Ok(())
    }

    #[cfg(unix)]
    pub fn is_inheritable(&self) -> Result<bool> {
        let flags = unsafe { libc::fcntl(self.as_raw(), libc::F_GETFD) };
        if flags < 0 {
            return Err(Error::last_os("fcntl(F_GETFD)"));
        }
        Ok(flags & libc::FD_CLOEXEC == 0)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn pipe_pair() -> (NativeHandle, NativeHandle) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
        unsafe { (NativeHandle::from_raw(fds[0]), NativeHandle::from_raw(fds[1])) }
    }

    #[test]
    fn inheritable_flag_round_trip() {
        let (r, _w) = pipe_pair();
        assert!(!r.is_inheritable().unwrap());
        r.set_inheritable(true).unwrap();
        assert!(r.is_inheritable().unwrap());
        r.set_inheritable(false).unwrap();
        assert!(!r.is_inheritable().unwrap());
    }

    #[test]
    fn clone_refers_to_same_pipe() {
        let (r, w) = pipe_pair();
        let w2 = w.try_clone().unwrap();
        assert_ne!(w.as_raw(), w2.as_raw());
        let byte = [7u8];
        assert_eq!(unsafe { libc::write(w2.as_raw(), byte.as_ptr().cast(), 1) }, 1);
        let mut out = [0u8];
        assert_eq!(unsafe { libc::read(r.as_raw(), out.as_mut_ptr().cast(), 1) }, 1);
        assert_eq!(out, byte);
    }

    #[test]
    fn check_maps_negative_fd_to_error() {
        assert!(NativeHandle::check("open", -1).is_err());
    }
}
