// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// OS synchronization and event notification: callback registries, named
// cross-process mutexes, events and shared memory, whole-file advisory locks,
// and a readiness multiplexer that dispatches fd/handle events to callbacks.

pub mod config;
pub mod name;
pub mod process;

mod error;
pub use error::{Error, Result};

mod handle;
pub use handle::{NativeHandle, RawNative};

mod platform;

mod callback;
pub use callback::{CallbackFault, CallbackManager, NameCallbackManager};

mod mapping;
pub use mapping::{system_alignment, MemoryMapping};

mod shm;
pub use shm::SharedMemory;

mod global_mutex;
pub use global_mutex::{GlobalMutex, GlobalMutexGuard};

mod global_event;
pub use global_event::GlobalEvent;

mod file_mutex;
pub use file_mutex::FileMutex;

pub mod notify;
#[cfg(target_os = "linux")]
pub use notify::FdSetNotify;
#[cfg(windows)]
pub use notify::HandleSetNotify;
pub use notify::Readiness;

pub use config::Config;
