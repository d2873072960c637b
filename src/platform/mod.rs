// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(windows)]
pub mod windows;

#[cfg(not(any(target_os = "linux", windows)))]
compile_error!("libsync supports Linux and Windows only");

// Re-export the platform-specific implementations under a uniform name.

#[cfg(target_os = "linux")]
pub use linux::{
    flush_region, lock_file, map_region, system_alignment, unlock_file, unmap_region,
    PlatformEvent, PlatformMutex, PlatformShm,
};

#[cfg(windows)]
pub use windows::{
    flush_region, lock_file, map_region, system_alignment, unlock_file, unmap_region,
    PlatformEvent, PlatformMutex, PlatformShm,
};
