// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type. Every OS failure keeps the raw errno / Win32 code so
// callers can branch on `kind()` without platform conditionals.

use std::io;

use thiserror::Error;

/// Errors returned by every fallible operation in this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The object name violates the platform naming rules.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// An argument was rejected before reaching the OS.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The process a named object refers to has exited (or its PID now
    /// belongs to an unrelated process).
    #[error("process {0} is not running")]
    ProcessNotFound(u32),

    /// A system call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_name(name: &str, reason: &'static str) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason,
        }
    }

    /// Wrap the calling thread's last OS error (`errno` / `GetLastError`).
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Wrap an error number returned directly by a call (pthread style).
    pub(crate) fn from_errno(op: &'static str, eno: i32) -> Self {
        Self::Os {
            op,
            source: io::Error::from_raw_os_error(eno),
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Os { op, source }
    }

    /// Platform-independent classification of the failure.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::InvalidName { .. } | Self::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Self::ProcessNotFound(_) => io::ErrorKind::NotFound,
            Self::Os { source, .. } => source.kind(),
        }
    }

    /// The raw errno (Linux) or Win32 error code, if this came from the OS.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == io::ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == io::ErrorKind::AlreadyExists
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Os { source, .. } => source,
            other => io::Error::new(other.kind(), other.to_string()),
        }
    }
}
