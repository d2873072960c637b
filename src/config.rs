// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide settings for the named-object backends.
//
// Resolution order:
//   1. `Config::install` (explicit, must run before first use)
//   2. LIBSYNC_SHM_DIR / LIBSYNC_SHM_PERMISSIONS environment variables
//   3. built-in defaults

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Directory that backs POSIX shared memory objects on Linux.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// S_IRUSR|S_IWUSR|S_IRGRP|S_IWGRP|S_IROTH|S_IWOTH
pub const DEFAULT_PERMISSIONS: u32 = 0o666;

pub const ENV_SHM_DIR: &str = "LIBSYNC_SHM_DIR";
pub const ENV_SHM_PERMISSIONS: &str = "LIBSYNC_SHM_PERMISSIONS";

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// Settings shared by every named primitive in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Mount point of the shared memory namespace. Named objects are
    /// published into it with `link(2)`, so it must be the directory that
    /// `shm_open` resolves names against.
    pub shm_dir: PathBuf,
    /// Mode bits applied to newly created objects.
    pub permissions: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            permissions: DEFAULT_PERMISSIONS,
        }
    }
}

impl Config {
    /// Defaults overridden by any recognised environment variable.
    /// Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(ENV_SHM_DIR) {
            if !dir.is_empty() {
                config.shm_dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(ENV_SHM_PERMISSIONS) {
            match parse_permissions(&raw) {
                Some(mode) => config.permissions = mode,
                None => tracing::warn!(value = %raw, "ignoring malformed {ENV_SHM_PERMISSIONS}"),
            }
        }
        config
    }

    /// Install `config` as the process-wide configuration.
    ///
    /// Returns the rejected value if a configuration was already resolved
    /// (either installed earlier or read lazily by a primitive).
    pub fn install(config: Config) -> Result<(), Config> {
        GLOBAL.set(config)
    }

    /// The process-wide configuration, resolving it from the environment on
    /// first access.
    pub fn global() -> &'static Config {
        GLOBAL.get_or_init(Self::from_env)
    }

    /// Full path of a named object inside the shared memory directory.
    pub fn shm_path(&self, object_name: &str) -> PathBuf {
        self.shm_dir.join(object_name.trim_start_matches('/'))
    }

    pub fn shm_dir(&self) -> &Path {
        &self.shm_dir
    }
}

fn parse_permissions(raw: &str) -> Option<u32> {
    let digits = raw.trim();
    let digits = digits
        .strip_prefix("0o")
        .or_else(|| digits.strip_prefix('0').filter(|d| !d.is_empty()))
        .unwrap_or(digits);
    u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
}
