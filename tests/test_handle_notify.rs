// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the Windows handle multiplexer.

#![cfg(windows)]

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libsync::notify::HandleSetNotify;
use libsync::NativeHandle;
use windows_sys::Win32::Foundation::FALSE;
use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent};

fn auto_event() -> NativeHandle {
    let raw = unsafe { CreateEventW(ptr::null(), FALSE, FALSE, ptr::null()) };
    assert!(!raw.is_null());
    unsafe { NativeHandle::from_raw(raw) }
}

fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn signalled_handle_invokes_callback() {
    let notify = HandleSetNotify::new(true).expect("new");
    let event = auto_event();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = Arc::clone(&hits);
    let id = notify
        .add_handle_state_callback(event.as_raw(), move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");

    unsafe { SetEvent(event.as_raw()) };
    assert!(eventually(|| hits.load(Ordering::SeqCst) == 1));

    assert!(notify.remove_handle_state_callback(id, true));
    unsafe { SetEvent(event.as_raw()) };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn handle_ceiling_is_an_error() {
    let notify = HandleSetNotify::new(false).expect("new");
    let events: Vec<_> = (0..libsync::notify::MAX_HANDLES + 1).map(|_| auto_event()).collect();
    for event in &events[..libsync::notify::MAX_HANDLES] {
        notify
            .add_handle_state_callback(event.as_raw(), || {})
            .expect("within ceiling");
    }
    let last = events.last().unwrap();
    assert!(notify.add_handle_state_callback(last.as_raw(), || {}).is_err());

    // A second callback on an already watched handle does not count.
    notify
        .add_handle_state_callback(events[0].as_raw(), || {})
        .expect("same handle");
}
