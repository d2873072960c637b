// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process identity helpers. A PID alone is ambiguous once the process exits
// and the kernel recycles the number, so identity is (pid, start tick).

use crate::error::{Error, Result};

pub type Pid = u32;

pub fn current_pid() -> Pid {
    std::process::id()
}

/// Start time of `pid` in clock ticks since boot (`/proc/<pid>/stat`
/// field 22). Fails with `ProcessNotFound` when the process does not exist.
#[cfg(target_os = "linux")]
pub fn start_tick(pid: Pid) -> Result<u64> {
    let path = format!("/proc/{pid}/stat");
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ProcessNotFound(pid))
        }
        Err(e) => return Err(Error::io("read /proc/<pid>/stat", e)),
    };
    parse_start_tick(&content).ok_or(Error::InvalidArgument("malformed /proc/<pid>/stat"))
}

/// The comm field (2) may itself contain spaces and parentheses, so fields
/// are counted from the last ')'. Field 3 is the first one after it.
#[cfg(target_os = "linux")]
fn parse_start_tick(stat: &str) -> Option<u64> {
    const START_TIME_FIELD: usize = 22;
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace()
        .nth(START_TIME_FIELD - 3)?
        .parse()
        .ok()
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn parses_start_time_after_comm() {
        let stat = "1234 (weird ) name) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    3 1 0 0 20 0 1 0 987654 12345678 200";
        assert_eq!(parse_start_tick(stat), Some(987654));
    }

    #[test]
    fn truncated_stat_is_rejected() {
        assert_eq!(parse_start_tick("1 (init) S 0 1"), None);
        assert_eq!(parse_start_tick("garbage"), None);
    }

    #[test]
    fn current_process_has_a_stable_tick() {
        let a = start_tick(current_pid()).unwrap();
        let b = start_tick(current_pid()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_process_is_not_found() {
        // pid_max is at most 2^22 on Linux.
        let err = start_tick(u32::MAX - 1).unwrap_err();
        assert!(err.is_not_found());
    }
}
