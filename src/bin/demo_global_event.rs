// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two-process demo of the named primitives.
//
// Usage:
//   demo_global_event wait
//   demo_global_event set <message>
//
// The waiter blocks on an auto-reset event named "libsync_demo". The setter
// writes <message> into a shared memory segment, guarded by a named mutex,
// then sets the event. The payload is a u32 length followed by the bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use libsync::{GlobalEvent, GlobalMutex, SharedMemory};

const EVENT: &str = "libsync_demo";
const MUTEX: &str = "libsync_demo";
const PAYLOAD: &str = "libsync_demo_payload";
const PAYLOAD_SIZE: usize = 4096;

static QUIT: AtomicBool = AtomicBool::new(false);

fn do_wait() -> libsync::Result<()> {
    let event = GlobalEvent::open_or_create(EVENT, false)?;
    let mutex = GlobalMutex::open_or_create(MUTEX)?;
    let shm = SharedMemory::open_or_create(PAYLOAD, PAYLOAD_SIZE as u64, false)?;
    let map = shm.map(PAYLOAD_SIZE, 0, true)?;

    println!("wait: listening on {EVENT:?} (ctrl-c to quit)");
    while !QUIT.load(Ordering::Acquire) {
        if !event.wait_timeout(Duration::from_millis(500))? {
            continue;
        }
        let message = {
            let _guard = mutex.lock_guard()?;
            let mut len = [0u8; 4];
            map.read_at(0, &mut len)?;
            let len = (u32::from_le_bytes(len) as usize).min(PAYLOAD_SIZE - 4);
            let mut body = vec![0u8; len];
            map.read_at(4, &mut body)?;
            body
        };
        println!("wait: received {:?}", String::from_utf8_lossy(&message));
    }
    Ok(())
}

fn do_set(message: &str) -> libsync::Result<()> {
    let event = GlobalEvent::open_or_create(EVENT, false)?;
    let mutex = GlobalMutex::open_or_create(MUTEX)?;
    let shm = SharedMemory::open_or_create(PAYLOAD, PAYLOAD_SIZE as u64, false)?;
    let mut map = shm.map(PAYLOAD_SIZE, 0, false)?;

    let body = &message.as_bytes()[..message.len().min(PAYLOAD_SIZE - 4)];
    {
        let _guard = mutex.lock_guard()?;
        map.write_at(0, &(body.len() as u32).to_le_bytes())?;
        map.write_at(4, body)?;
    }
    event.set()?;
    println!("set: sent {} bytes", body.len());

    #[cfg(target_os = "linux")]
    match event.alive_creator() {
        Ok(pid) => println!("set: event created by pid {pid}"),
        Err(e) => println!("set: event creator is gone ({e})"),
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let result = match args.get(1).map(String::as_str) {
        Some("wait") => {
            install_quit_handler();
            do_wait()
        }
        Some("set") if args.len() >= 3 => do_set(&args[2..].join(" ")),
        _ => {
            eprintln!("usage: demo_global_event wait");
            eprintln!("       demo_global_event set <message>");
            std::process::exit(1);
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

// Sets QUIT on SIGINT / SIGTERM so the wait loop can exit cleanly.
fn install_quit_handler() {
    #[cfg(unix)]
    {
        extern "C" fn handler(_: libc::c_int) {
            QUIT.store(true, Ordering::Release);
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        }
    }
}
