// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the named inter-process event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use libsync::GlobalEvent;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_evt_{}_{n}", std::process::id())
}

// Generous bound for scheduler latency on loaded CI machines.
const SLACK: Duration = Duration::from_millis(250);

#[test]
fn starts_unsignalled() {
    let name = unique_name("initial");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, true).expect("create");
    assert!(!ev.wait_timeout(Duration::ZERO).expect("wait"));

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn manual_reset_stays_signalled_until_reset() {
    let name = unique_name("manual");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, true).expect("create");
    assert!(ev.is_manual());
    ev.set().expect("set");
    assert!(ev.wait_timeout(Duration::ZERO).expect("first wait"));
    assert!(ev.wait_timeout(Duration::ZERO).expect("second wait"));
    ev.wait().expect("blocking wait returns at once");

    ev.reset().expect("reset");
    assert!(!ev.wait_timeout(Duration::from_millis(10)).expect("after reset"));

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn auto_reset_is_consumed_by_one_wait() {
    let name = unique_name("auto");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, false).expect("create");
    assert!(!ev.is_manual());
    ev.set().expect("set");
    assert!(ev.wait_timeout(Duration::ZERO).expect("first wait"));
    assert!(!ev.wait_timeout(Duration::from_millis(10)).expect("second wait"));

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn second_handle_sees_signal() {
    let name = unique_name("two_handles");
    GlobalEvent::clear(&name).expect("clear");

    let setter = GlobalEvent::open_or_create(&name, true).expect("setter");
    let waiter = GlobalEvent::open(&name).expect("waiter");
    setter.set().expect("set");
    assert!(waiter.wait_timeout(Duration::from_millis(100)).expect("wait"));

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn set_wakes_a_blocked_waiter() {
    let name = unique_name("wake");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, false).expect("create");
    let waiter = {
        let name = name.clone();
        thread::spawn(move || {
            let ev = GlobalEvent::open_or_create(&name, false).expect("open");
            ev.wait_timeout(Duration::from_secs(5)).expect("wait")
        })
    };
    thread::sleep(Duration::from_millis(50));
    ev.set().expect("set");
    assert!(waiter.join().unwrap());

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn manual_reset_releases_every_waiter() {
    let name = unique_name("broadcast");
    GlobalEvent::clear(&name).expect("clear");

    const WAITERS: usize = 4;
    let ev = GlobalEvent::open_or_create(&name, true).expect("create");
    let ready = Arc::new(Barrier::new(WAITERS + 1));
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let name = name.clone();
            let ready = Arc::clone(&ready);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let ev = GlobalEvent::open(&name).expect("open");
                ready.wait();
                if ev.wait_timeout(Duration::from_secs(5)).expect("wait") {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    ready.wait();
    thread::sleep(Duration::from_millis(50));
    ev.set().expect("set");
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), WAITERS);

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn auto_reset_releases_one_waiter_per_set() {
    let name = unique_name("one_per_set");
    GlobalEvent::clear(&name).expect("clear");

    const WAITERS: usize = 3;
    let ev = GlobalEvent::open_or_create(&name, false).expect("create");
    let ready = Arc::new(Barrier::new(WAITERS + 1));
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let name = name.clone();
            let ready = Arc::clone(&ready);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                let ev = GlobalEvent::open(&name).expect("open");
                ready.wait();
                if ev.wait_timeout(Duration::from_millis(600)).expect("wait") {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    ready.wait();
    thread::sleep(Duration::from_millis(50));
    ev.set().expect("set");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    ev.set().expect("set again");
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 2);

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn wait_timeout_respects_the_deadline() {
    let name = unique_name("deadline");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, false).expect("create");
    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    assert!(!ev.wait_timeout(timeout).expect("wait"));
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed < timeout + SLACK, "overslept: {elapsed:?}");

    GlobalEvent::clear(&name).expect("clear");
}

#[test]
fn wait_timeout_ignores_reset_wakeups() {
    // A set immediately undone by reset wakes the waiter without satisfying
    // it; the wait must keep going until its original deadline.
    let name = unique_name("spurious");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, true).expect("create");
    let timeout = Duration::from_millis(200);
    let waiter = {
        let name = name.clone();
        thread::spawn(move || {
            let ev = GlobalEvent::open(&name).expect("open");
            let start = Instant::now();
            let signalled = ev.wait_timeout(timeout).expect("wait");
            (signalled, start.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(20));
    ev.set().expect("set");
    ev.reset().expect("reset");
    let (signalled, elapsed) = waiter.join().unwrap();
    if !signalled {
        assert!(elapsed >= timeout, "returned early after {elapsed:?}");
        assert!(elapsed < timeout + SLACK);
    }

    GlobalEvent::clear(&name).expect("clear");
}

#[cfg(target_os = "linux")]
#[test]
fn creator_is_this_process() {
    let name = unique_name("creator");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, false).expect("create");
    assert_eq!(ev.alive_creator().expect("alive"), std::process::id());
    let other = GlobalEvent::open(&name).expect("open");
    assert_eq!(other.alive_creator().expect("alive"), std::process::id());

    GlobalEvent::clear(&name).expect("clear");
}

#[cfg(target_os = "linux")]
#[test]
fn open_handles_survive_clear() {
    let name = unique_name("after_clear");
    GlobalEvent::clear(&name).expect("clear");

    let ev = GlobalEvent::open_or_create(&name, true).expect("create");
    GlobalEvent::clear(&name).expect("clear");
    ev.set().expect("set on unlinked record");
    assert!(ev.wait_timeout(Duration::ZERO).expect("wait"));

    // A fresh create now makes a new, unsignalled record.
    let fresh = GlobalEvent::open_or_create(&name, true).expect("recreate");
    assert!(!fresh.wait_timeout(Duration::ZERO).expect("wait"));

    GlobalEvent::clear(&name).expect("clear");
}
