// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the readiness multiplexer.

#![cfg(target_os = "linux")]

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use libsync::{FdSetNotify, Readiness};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn eventfd() -> OwnedFd {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    assert!(fd >= 0);
    unsafe { std::os::fd::FromRawFd::from_raw_fd(fd) }
}

fn signal(fd: &OwnedFd) {
    let one: u64 = 1;
    let n = unsafe { libc::write(fd.as_raw_fd(), (&one as *const u64).cast(), 8) };
    assert_eq!(n, 8);
}

fn drain(fd: i32) {
    let mut value: u64 = 0;
    unsafe { libc::read(fd, (&mut value as *mut u64).cast(), 8) };
}

/// Poll `cond` until it holds or two seconds pass.
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
fn readable_callback_fires_when_data_arrives() {
    init_tracing();
    let notify = FdSetNotify::new(true).expect("new");
    let efd = eventfd();
    let raw = efd.as_raw_fd();
    let (tx, rx) = mpsc::channel();

    let tx = std::sync::Mutex::new(tx);
    notify
        .add_readable_callback(raw, move || {
            drain(raw);
            let _ = tx.lock().unwrap().send(());
        })
        .expect("register");
    assert!(notify.is_running());

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    signal(&efd);
    rx.recv_timeout(Duration::from_secs(2)).expect("callback fired");
}

#[test]
fn manual_mode_needs_start() {
    let notify = FdSetNotify::new(false).expect("new");
    let efd = eventfd();
    let raw = efd.as_raw_fd();
    let hits = Arc::new(AtomicUsize::new(0));

    let h = Arc::clone(&hits);
    notify
        .add_readable_callback(raw, move || {
            drain(raw);
            h.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");
    assert!(!notify.is_running());

    signal(&efd);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    notify.start().expect("start");
    assert!(eventually(|| hits.load(Ordering::SeqCst) == 1));

    notify.stop().expect("stop");
    assert!(!notify.is_running());
    notify.stop().expect("second stop is a no-op");
}

#[test]
fn removing_readable_keeps_writable_on_same_fd() {
    let notify = FdSetNotify::new(true).expect("new");
    let (a, _b) = UnixStream::pair().expect("pair");
    a.set_nonblocking(true).unwrap();
    let fd = a.as_raw_fd();

    let reads = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(AtomicUsize::new(0));

    let r = Arc::clone(&reads);
    let read_id = notify
        .add_readable_callback(fd, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .expect("readable");
    let w = Arc::clone(&writes);
    let write_id = notify
        .add_writable_callback(fd, move || {
            w.fetch_add(1, Ordering::SeqCst);
        })
        .expect("writable");

    // The socket is writable right away; nothing has been sent to it.
    assert!(eventually(|| writes.load(Ordering::SeqCst) > 0));
    assert_eq!(reads.load(Ordering::SeqCst), 0);

    assert!(notify.remove_state_callback(read_id, true));
    let before = writes.load(Ordering::SeqCst);
    assert!(eventually(|| writes.load(Ordering::SeqCst) > before));

    assert!(notify.remove_state_callback(write_id, true));
    assert!(!notify.remove_state_callback(write_id, true));
}

#[test]
fn state_callback_reports_readiness() {
    let notify = FdSetNotify::new(true).expect("new");
    let (a, b) = UnixStream::pair().expect("pair");
    let fd = a.as_raw_fd();
    let seen = Arc::new(std::sync::Mutex::new(Vec::<Readiness>::new()));

    let s = Arc::clone(&seen);
    let id = notify
        .add_state_callback(fd, move |r| s.lock().unwrap().push(r))
        .expect("register");

    assert!(eventually(|| seen.lock().unwrap().iter().any(|r| r.writable)));

    drop(b);
    assert!(eventually(|| seen
        .lock()
        .unwrap()
        .iter()
        .any(|r| r.readable && r.hangup)));

    notify.remove_state_callback(id, true);
}

#[test]
fn removed_callback_stops_firing() {
    let notify = FdSetNotify::new(true).expect("new");
    let efd = eventfd();
    let raw = efd.as_raw_fd();
    let hits = Arc::new(AtomicUsize::new(0));

    // Never drained, so level-triggered readiness fires continuously.
    let h = Arc::clone(&hits);
    let id = notify
        .add_readable_callback(raw, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register");
    signal(&efd);
    assert!(eventually(|| hits.load(Ordering::SeqCst) > 0));

    assert!(notify.remove_state_callback(id, true));
    let after_remove = hits.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(hits.load(Ordering::SeqCst), after_remove);
}

#[test]
fn callback_can_register_another_callback() {
    let notify = Arc::new(FdSetNotify::new(true).expect("new"));
    let first = eventfd();
    let second = eventfd();
    let (first_raw, second_raw) = (first.as_raw_fd(), second.as_raw_fd());
    let hits = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&notify);
    let h = Arc::clone(&hits);
    notify
        .add_readable_callback(first_raw, move || {
            drain(first_raw);
            let Some(notify) = weak.upgrade() else { return };
            let h = Arc::clone(&h);
            notify
                .add_readable_callback(second_raw, move || {
                    drain(second_raw);
                    h.fetch_add(1, Ordering::SeqCst);
                })
                .expect("nested register");
        })
        .expect("register");

    signal(&first);
    std::thread::sleep(Duration::from_millis(50));
    signal(&second);
    assert!(eventually(|| hits.load(Ordering::SeqCst) >= 1));
}

#[test]
fn panicking_callback_does_not_kill_the_thread() {
    init_tracing();
    let notify = FdSetNotify::new(true).expect("new");
    let efd = eventfd();
    let raw = efd.as_raw_fd();
    let hits = Arc::new(AtomicUsize::new(0));

    notify
        .add_readable_callback(raw, move || {
            drain(raw);
            panic!("callback failure");
        })
        .expect("register");
    let h = Arc::clone(&hits);
    notify
        .add_readable_callback(raw, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .expect("register second");

    signal(&efd);
    assert!(eventually(|| hits.load(Ordering::SeqCst) > 0));
    assert!(notify.is_running());
}

#[test]
fn invalid_fd_is_rejected_and_rolled_back() {
    let notify = FdSetNotify::new(false).expect("new");
    assert!(notify.add_readable_callback(-1, || {}).is_err());

    // Far above any descriptor this process has open.
    let unused = 1 << 20;
    let err = notify.add_readable_callback(unused, || {}).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn regular_files_are_not_pollable() {
    let notify = FdSetNotify::new(false).expect("new");
    let file = tempfile::tempfile().unwrap();
    let err = notify
        .add_readable_callback(file.as_raw_fd(), || {})
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));

    // After the rollback the same fd can be tried again with the same result.
    let err = notify
        .add_writable_callback(file.as_raw_fd(), || {})
        .unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EPERM));
}
