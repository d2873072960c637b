// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Readiness multiplexers: one background thread per instance turns "this
// descriptor became ready" into callback dispatch.
//
// The concrete implementation is selected at compile time: epoll on Linux,
// WaitForMultipleObjects on Windows.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::FdSetNotify;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{HandleSetNotify, MAX_HANDLES};

/// What a descriptor became ready for.
///
/// Hang-up and error conditions count as readable, so a reader observes the
/// EOF or error on its next read. An error also counts as writable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
    pub error: bool,
}

impl Readiness {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
        hangup: false,
        error: false,
    };

    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
        hangup: false,
        error: false,
    };
}
