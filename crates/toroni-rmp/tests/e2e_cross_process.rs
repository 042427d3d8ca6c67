//! Two-process integration test: a writer process and a reader process,
//! attached to the same named shared-memory ring, running concurrently.
//!
//! Uses the same self-spawning pattern as the rest of this codebase's
//! cross-process tests — the test binary re-invokes itself with an
//! environment variable naming the role to play.
//!
//! ```bash
//! cargo test -p toroni-rmp --test e2e_cross_process -- --nocapture
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use toroni_rmp::{BackpressureReader, ByteRing, CopyAll, ReadOutcome, ReaderInfoTable, RingConfig, Writer};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "TORONI_E2E_ROLE";
const ENV_RING_NAME: &str = "TORONI_E2E_RING";
const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

const MESSAGE_COUNT: u64 = 20_000;
const RING_SIZE: u64 = 1 << 16;

fn bus_name() -> String {
    format!("/toroni_e2e_bus_{}", std::process::id())
}

fn reader_table_name(ring_name: &str) -> String {
    format!("{ring_name}_readers")
}

fn run_writer(ring_name: &str) {
    log!("[WRITER] creating ring '{ring_name}'");
    let ring = ByteRing::create_or_open(ring_name, RingConfig::new(RING_SIZE)).expect("writer: create ring");
    let readers = ReaderInfoTable::create_or_open(&reader_table_name(ring_name), 8)
        .expect("writer: create reader table");
    let writer = Writer::new(Arc::new(ring), Arc::new(readers));

    // Give the reader a moment to attach and activate; it's fine if it
    // misses the earliest few messages, this isn't a guaranteed-delivery
    // transport.
    std::thread::sleep(Duration::from_millis(20));

    for i in 0..MESSAGE_COUNT {
        writer.write_ex(&i.to_le_bytes(), &mut |_, _| false);
        if i % 5_000 == 0 {
            std::thread::sleep(Duration::from_micros(200));
        }
    }
    log!("[WRITER] wrote {MESSAGE_COUNT} messages");
}

fn run_reader(ring_name: &str) {
    let open_deadline = Instant::now() + Duration::from_secs(5);
    let (ring, readers) = loop {
        match (
            ByteRing::create_or_open(ring_name, RingConfig::new(RING_SIZE)),
            ReaderInfoTable::create_or_open(&reader_table_name(ring_name), 8),
        ) {
            (Ok(r), Ok(t)) => break (r, t),
            _ if Instant::now() < open_deadline => std::thread::sleep(Duration::from_millis(1)),
            _ => panic!("reader: failed to attach within deadline"),
        }
    };

    let mut reader = BackpressureReader::new(Arc::new(ring), Arc::new(readers)).expect("reader: alloc slot");
    reader.activate();

    let mut received: u64 = 0;
    let mut last_seen: Option<u64> = None;
    let read_deadline = Instant::now() + Duration::from_secs(10);
    let mut idle_spins: u32 = 0;

    while Instant::now() < read_deadline {
        let mut batch = Vec::new();
        let outcome = reader.read_ex(&mut CopyAll::new(|data| {
            batch.push(u64::from_le_bytes(data.try_into().unwrap()));
        }));

        match outcome {
            ReadOutcome::Success if !batch.is_empty() => {
                for v in batch {
                    if let Some(prev) = last_seen {
                        assert!(v > prev, "out-of-order delivery: {v} after {prev}");
                    }
                    last_seen = Some(v);
                    received += 1;
                }
                idle_spins = 0;
            }
            ReadOutcome::Success => {
                idle_spins += 1;
                if idle_spins > 50_000 && received > 0 {
                    break;
                }
                std::hint::spin_loop();
            }
            ReadOutcome::ExpiredPosition => {
                log!("[READER] fell behind, reactivating at the current tail");
                reader.deactivate();
                reader.activate();
            }
            ReadOutcome::InvalidPosition => {
                unreachable!("a stateful reader never asks about a position ahead of the tail")
            }
        }
    }

    log!("[READER] received {received} messages, last={last_seen:?}");
    assert!(received > 0, "reader received no messages at all");
}

#[test]
fn e2e_two_process_pub_sub() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let ring_name = env::var(ENV_RING_NAME).expect("ring name not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&ring_name),
            ROLE_READER => run_reader(&ring_name),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let ring_name = bus_name();
    let exe = env::current_exe().expect("current_exe");

    let mut writer_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_pub_sub")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_RING_NAME, &ring_name)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn writer");

    let mut reader_proc = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_pub_sub")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_RING_NAME, &ring_name)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn reader");

    let writer_status = writer_proc.wait().expect("wait writer");
    let reader_status = reader_proc.wait().expect("wait reader");

    let _ = toroni_sys::SharedRegion::unlink(&ring_name);
    let _ = toroni_sys::SharedRegion::unlink(&reader_table_name(&ring_name));

    assert!(writer_status.success(), "writer failed: {writer_status}");
    assert!(reader_status.success(), "reader failed: {reader_status}");
}
