// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Name rules for named cross-process objects.
//
// Linux names live in the shared memory directory and follow file name rules.
// Windows names are kernel object names with an optional session prefix
// ("Global\" needs SeCreateGlobalPrivilege to create).

use crate::error::{Error, Result};

/// Longest accepted Linux name. NAME_MAX is 255; the remainder is reserved
/// for the per-kind suffixes appended by the mutex and event backends.
pub const MAX_NAME_LEN: usize = 200;

/// Session prefixes accepted in front of a Windows object name.
pub const SESSION_PREFIXES: [&str; 2] = ["Global\\", "Local\\"];

/// Suffix of the temporary object created before publishing a new segment.
pub(crate) const TEMP_SHM_SUFFIX: &str = ".sync_shared_memory";

/// Check `name` against the rules of the current platform.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_name(name, "name is empty"));
    }
    if name.contains('\0') {
        return Err(Error::invalid_name(name, "contains a NUL byte"));
    }
    validate_platform(name)
}

#[cfg(not(windows))]
fn validate_platform(name: &str) -> Result<()> {
    if name.contains('/') {
        return Err(Error::invalid_name(name, "contains '/'"));
    }
    if name == "." || name == ".." {
        return Err(Error::invalid_name(name, "reserved directory name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_name(name, "longer than 200 bytes"));
    }
    Ok(())
}

#[cfg(windows)]
fn validate_platform(name: &str) -> Result<()> {
    let body = SESSION_PREFIXES
        .iter()
        .find_map(|p| name.strip_prefix(p))
        .unwrap_or(name);
    if body.is_empty() {
        return Err(Error::invalid_name(name, "empty after session prefix"));
    }
    if body.contains('\\') {
        return Err(Error::invalid_name(name, "contains '\\' outside the session prefix"));
    }
    if name.encode_utf16().count() >= 260 {
        return Err(Error::invalid_name(name, "longer than MAX_PATH"));
    }
    Ok(())
}

/// Process-unique name for an object that is about to be created and then
/// published under its real name.
pub(crate) fn temp_name(suffix: &str) -> String {
    format!("{}{suffix}", uuid::Uuid::new_v4().simple())
}
