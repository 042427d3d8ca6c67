//! Exercises topic filtering (descendant channels) and the generation
//! cutoff (a subscriber created after a message is authored never sees it)
//! end to end through `AsyncWriter`/`TopicReader`.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use toroni_rmp::{ByteRing, RingConfig};
use toroni_sys::{Notifier, SharedRegion};
use toroni_tp::{AsyncWriter, TopicReader, TopicReaderInfo};

fn unique_name(tag: &str) -> String {
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("/toroni_test_tp_{tag}_{ts}")
}

fn bind_notifier(port: u16) -> Notifier {
    Notifier::bind(Ipv4Addr::new(239, 5, 5, 5), port, Ipv4Addr::LOCALHOST).expect("bind notifier")
}

struct Bus {
    ring_name: String,
    readers_name: String,
}

impl Drop for Bus {
    fn drop(&mut self) {
        let _ = SharedRegion::unlink(&self.ring_name);
        let _ = SharedRegion::unlink(&self.readers_name);
        let _ = SharedRegion::unlink(&format!("{}_gen", self.readers_name));
    }
}

fn wait_until(mut done: impl FnMut() -> bool, reader: &TopicReader) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        reader.poll();
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition never became true within the deadline");
}

#[test]
fn descendant_channels_and_generation_cutoff() {
    let ring_name = unique_name("bus");
    let readers_name = format!("{ring_name}_readers");
    let _bus = Bus {
        ring_name: ring_name.clone(),
        readers_name: readers_name.clone(),
    };

    let ring = Arc::new(ByteRing::create_or_open(&ring_name, RingConfig::new(1 << 16)).unwrap());
    let topic_info = Arc::new(TopicReaderInfo::create_or_open(&readers_name, 4).unwrap());

    let port = 34_567;
    let writer = AsyncWriter::new(
        Arc::clone(&ring),
        Arc::clone(&topic_info),
        bind_notifier(port),
        Ipv4Addr::new(239, 5, 5, 5),
        port,
        Box::new(|_, _| false),
    );

    let topic_reader =
        TopicReader::new(Arc::clone(&ring), Arc::clone(&topic_info), bind_notifier(port), None).unwrap();

    let exact_hits = Arc::new(AtomicUsize::new(0));
    let exact_hits2 = Arc::clone(&exact_hits);
    topic_reader.create_channel_reader(
        "orders",
        false,
        Box::new(move |_| {
            exact_hits2.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let descendant_hits = Arc::new(AtomicUsize::new(0));
    let descendant_hits2 = Arc::clone(&descendant_hits);
    topic_reader.create_channel_reader(
        "orders",
        true,
        Box::new(move |_| {
            descendant_hits2.fetch_add(1, Ordering::SeqCst);
        }),
    );

    // Let Qsub land the subscriptions (and the resulting reader activation)
    // before anything is posted.
    std::thread::sleep(Duration::from_millis(20));

    let msg = writer.create_message("orders.fx", b"buy", false).unwrap();
    writer.post(msg);

    let unrelated = writer.create_message("quotes", b"noise", false).unwrap();
    writer.post(unrelated);

    wait_until(
        || exact_hits.load(Ordering::SeqCst) + descendant_hits.load(Ordering::SeqCst) >= 1,
        &topic_reader,
    );

    assert_eq!(
        exact_hits.load(Ordering::SeqCst),
        0,
        "an exact subscriber on 'orders' must not see a post to 'orders.fx'"
    );
    assert_eq!(
        descendant_hits.load(Ordering::SeqCst),
        1,
        "a descendant-handling subscriber on 'orders' must see exactly the one matching post"
    );

    // A subscriber created after the post must not see it, even though its
    // channel matches by topic — the generation cutoff excludes it.
    let late_hits = Arc::new(AtomicUsize::new(0));
    let late_hits2 = Arc::clone(&late_hits);
    topic_reader.create_channel_reader(
        "orders",
        true,
        Box::new(move |_| {
            late_hits2.fetch_add(1, Ordering::SeqCst);
        }),
    );
    std::thread::sleep(Duration::from_millis(50));
    topic_reader.poll();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        late_hits.load(Ordering::SeqCst),
        0,
        "a subscriber created after a post must not see that pre-existing message"
    );

    let msg2 = writer.create_message("orders.gold", b"sell", false).unwrap();
    writer.post(msg2);
    wait_until(|| late_hits.load(Ordering::SeqCst) >= 1, &topic_reader);
    assert_eq!(
        late_hits.load(Ordering::SeqCst),
        1,
        "the late subscriber does see a message posted after it was created"
    );
}
