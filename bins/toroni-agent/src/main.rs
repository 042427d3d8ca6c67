//! Demonstrator and manual test harness for a Toroni bus. Every knob comes
//! from an environment variable so the same binary can be launched as
//! independent writer/reader processes — see `TORONI_AGENT_*` below.
//!
//! `writer`/`reader` exercise the topic layer end to end. `robust-writer`
//! crashes while holding the ring's writer mutex without unlocking it, and
//! `robust-reader` attaches afterwards and writes through it — proving the
//! robust mutex recovers an abandoned lock rather than wedging the bus.

use std::env;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toroni_rmp::{ByteRing, ReaderInfoTable, RingConfig, Writer};
use toroni_sys::Notifier;
use toroni_tp::{AsyncWriter, TopicReader, TopicReaderInfo};
use tracing::info;
use tracing_subscriber::EnvFilter;

const NOTIFY_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 19, 19, 19);
const NOTIFY_PORT: u16 = 24191;

fn env_var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = env_var("TORONI_AGENT_LOG_LEVEL", "info");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let bus_name = env_var("TORONI_AGENT_BUS_NAME", "/toroni_demo_bus");
    let ring_size_kb: u64 = env_parse("TORONI_AGENT_RINGBUF_SIZE_KB", 1024);
    let readers_max: u16 = env_parse("TORONI_AGENT_READERS_MAX", 32);
    let role = env_var("TORONI_AGENT_ROLE", "writer");

    let ring_name = bus_name.clone();
    let readers_name = format!("{bus_name}_readers");
    let ring_size_bytes = ring_size_kb * 1024;

    match role.as_str() {
        "writer" => run_writer(&ring_name, &readers_name, ring_size_bytes, readers_max),
        "reader" => run_reader(&ring_name, &readers_name, ring_size_bytes, readers_max),
        "robust-writer" => run_robust_writer(&ring_name, ring_size_bytes),
        "robust-reader" => run_robust_reader(&ring_name, &readers_name, ring_size_bytes, readers_max),
        other => {
            eprintln!("unknown TORONI_AGENT_ROLE '{other}' (expected writer|reader|robust-writer|robust-reader)");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn run_writer(ring_name: &str, readers_name: &str, ring_size_bytes: u64, readers_max: u16) {
    let channel = env_var("TORONI_AGENT_CHANNEL", "demo");
    let message_count: u64 = env_parse("TORONI_AGENT_MESSAGES", 1_000);
    let message_size: usize = env_parse("TORONI_AGENT_MESSAGE_SIZE_BYTES", 64);
    let bp_sleep_ms: u64 = env_parse("TORONI_AGENT_BACKPRESSURE_SLEEP_MS", 5);

    let ring = Arc::new(ByteRing::create_or_open(ring_name, RingConfig::new(ring_size_bytes)).expect("create ring"));
    let topic_info = Arc::new(TopicReaderInfo::create_or_open(readers_name, readers_max).expect("create reader table"));
    let notifier = Notifier::bind(NOTIFY_MULTICAST_ADDR, NOTIFY_PORT, Ipv4Addr::UNSPECIFIED).expect("bind notifier");

    let bp_count = Arc::new(AtomicU64::new(0));
    let bp_count_for_handler = Arc::clone(&bp_count);
    let writer = AsyncWriter::new(
        ring,
        topic_info,
        notifier,
        NOTIFY_MULTICAST_ADDR,
        NOTIFY_PORT,
        Box::new(move |_, _| {
            bp_count_for_handler.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(bp_sleep_ms));
            true
        }),
    );

    info!(bus = ring_name, %channel, message_count, message_size, "toroni-agent writer starting");
    let payload = vec![0xABu8; message_size];
    for i in 0..message_count {
        let mut body = payload.clone();
        body[..8.min(body.len())].copy_from_slice(&i.to_le_bytes()[..8.min(body.len())]);
        match writer.create_message(&channel, &body, false) {
            Ok(msg) => writer.post(msg),
            Err(err) => {
                tracing::error!(error = %err, "failed to build message, skipping");
                continue;
            }
        }
    }

    info!(
        backpressure_events = bp_count.load(Ordering::Relaxed),
        "toroni-agent writer finished posting"
    );
    // Give the drain thread a moment to flush the tail of the staging queue.
    std::thread::sleep(Duration::from_millis(200));
}

fn run_reader(ring_name: &str, readers_name: &str, ring_size_bytes: u64, readers_max: u16) {
    let channel = env_var("TORONI_AGENT_CHANNEL", "demo");

    let ring = Arc::new(ByteRing::create_or_open(ring_name, RingConfig::new(ring_size_bytes)).expect("attach ring"));
    let topic_info = Arc::new(
        TopicReaderInfo::create_or_open(readers_name, readers_max).expect("attach reader table"),
    );
    let notifier = Notifier::bind(NOTIFY_MULTICAST_ADDR, NOTIFY_PORT, Ipv4Addr::UNSPECIFIED).expect("bind notifier");

    let reader = TopicReader::new(ring, topic_info, notifier, None).expect("create topic reader");
    let received = Arc::new(AtomicU64::new(0));
    let received_for_handler = Arc::clone(&received);
    reader.create_channel_reader(
        channel.clone(),
        true,
        Box::new(move |_data| {
            received_for_handler.fetch_add(1, Ordering::Relaxed);
        }),
    );

    info!(bus = ring_name, %channel, "toroni-agent reader listening");
    reader.run();
}

fn run_robust_writer(ring_name: &str, ring_size_bytes: u64) {
    let ring = ByteRing::create_or_open(ring_name, RingConfig::new(ring_size_bytes)).expect("create ring");
    info!("acquiring writer mutex and exiting without unlocking, to demonstrate robust-mutex recovery");
    ring.writer_mutex().lock();
    std::process::exit(1);
}

fn run_robust_reader(ring_name: &str, readers_name: &str, ring_size_bytes: u64, readers_max: u16) {
    let ring = Arc::new(ByteRing::create_or_open(ring_name, RingConfig::new(ring_size_bytes)).expect("attach ring"));
    let readers =
        Arc::new(ReaderInfoTable::create_or_open(readers_name, readers_max).expect("attach reader table"));
    let writer = Writer::new(Arc::clone(&ring), readers);

    info!("writing through a ring whose previous writer may have crashed mid-lock");
    writer.write_ex(b"robust-mutex recovery probe", &mut |_, _| false);
    info!(
        free_pos = ring.free_pos().load(std::sync::atomic::Ordering::Acquire),
        "write succeeded; the mutex was not wedged"
    );
}
