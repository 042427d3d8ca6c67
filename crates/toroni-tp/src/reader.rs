//! The subscriber side of a bus: one underlying RMP reader multiplexed over
//! any number of channel subscriptions, each filtered independently by
//! topic and generation.
//!
//! Subscriber-list mutation (`create_channel_reader`/`close_channel_reader`)
//! and the read-and-dispatch loop each run on their own serial work queue —
//! `Qsub` and `Qrmp` — so a handler calling back into this reader (to
//! subscribe to another channel, say) can never deadlock against the
//! dispatch loop that's currently invoking it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use toroni_rmp::{BackpressureReader, ByteRing, CopyAll, ReadOutcome};
use toroni_sys::{Notifier, SerialWorkQueue};

use crate::channel_reader::{ChannelHandler, ChannelReader, ChannelReaderId};
use crate::error::TpError;
use crate::reader_info::TopicReaderInfo;
use crate::wire;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelReaderEvent {
    /// The first subscriber was just created; the underlying RMP reader has
    /// been activated.
    FirstCreated,
    /// The last remaining subscriber was just closed; the underlying RMP
    /// reader has been deactivated.
    LastClosed,
    /// The underlying RMP reader fell behind the ring and was reactivated
    /// at the current tail — every subscriber just lost whatever was
    /// skipped.
    AllExpired,
}

pub type EventCallback = Box<dyn Fn(ChannelReaderEvent) + Send + Sync>;

struct Shared {
    topic_info: Arc<TopicReaderInfo>,
    rmp_reader: Mutex<BackpressureReader>,
    subscribers: Mutex<Vec<Arc<ChannelReader>>>,
    next_id: AtomicU64,
    qsub: SerialWorkQueue,
    qrmp: SerialWorkQueue,
    notifier: Notifier,
    events: Mutex<Option<EventCallback>>,
}

impl Shared {
    fn activate_rmp_reader(&self) {
        let mut reader = self.rmp_reader.lock().unwrap();
        if !reader.is_active() {
            reader.activate();
        }
    }

    fn deactivate_rmp_reader(&self) {
        let mut reader = self.rmp_reader.lock().unwrap();
        if reader.is_active() {
            reader.deactivate();
        }
    }

    fn fire_event(&self, event: ChannelReaderEvent) {
        if let Some(cb) = self.events.lock().unwrap().as_deref() {
            cb(event);
        }
    }

    fn dispatch_one(&self, bytes: &[u8]) {
        let subs = self.subscribers.lock().unwrap();
        for sub in subs.iter() {
            if let Some(decoded) =
                wire::deserialize_and_filter(bytes, sub.generation, &sub.channel, sub.handle_descendants)
            {
                sub.dispatch(&decoded);
            }
        }
    }

    fn drain_and_dispatch(&self) {
        let mut reader = self.rmp_reader.lock().unwrap();
        if !reader.is_active() {
            return;
        }

        loop {
            let mut batch: Vec<Vec<u8>> = Vec::new();
            let outcome = reader.read_ex(&mut CopyAll::new(|data| batch.push(data.to_vec())));

            for bytes in &batch {
                self.dispatch_one(bytes);
            }

            match outcome {
                ReadOutcome::Success if batch.is_empty() => break,
                ReadOutcome::Success => continue,
                ReadOutcome::ExpiredPosition => {
                    reader.deactivate();
                    reader.activate();
                    self.fire_event(ChannelReaderEvent::AllExpired);
                    break;
                }
                ReadOutcome::InvalidPosition => break,
            }
        }
    }
}

/// Owns the subscribe side of one bus. Cheap to clone — every clone shares
/// the same subscriber list, RMP reader, and queues.
#[derive(Clone)]
pub struct TopicReader {
    inner: Arc<Shared>,
}

impl TopicReader {
    pub fn new(
        ring: Arc<ByteRing>,
        topic_info: Arc<TopicReaderInfo>,
        notifier: Notifier,
        on_event: Option<EventCallback>,
    ) -> Result<Self, TpError> {
        let rmp_reader = BackpressureReader::new(ring, topic_info.readers_arc())?;
        let inner = Arc::new(Shared {
            topic_info,
            rmp_reader: Mutex::new(rmp_reader),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            qsub: SerialWorkQueue::new("toroni-tp-qsub"),
            qrmp: SerialWorkQueue::new("toroni-tp-qrmp"),
            notifier,
            events: Mutex::new(on_event),
        });
        Ok(Self { inner })
    }

    /// Subscribes `handler` to `channel`, returning an id usable with
    /// [`Self::close_channel_reader`]. The subscriber's generation cutoff
    /// is captured synchronously, before this call returns, even though the
    /// list mutation itself is queued on `Qsub`.
    pub fn create_channel_reader(
        &self,
        channel: impl Into<String>,
        handle_descendants: bool,
        handler: ChannelHandler,
    ) -> ChannelReaderId {
        let id = ChannelReaderId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let reader = Arc::new(ChannelReader {
            id,
            channel: channel.into(),
            handle_descendants,
            generation: self.inner.topic_info.current_generation(),
            handler: Mutex::new(handler),
        });

        let shared = Arc::clone(&self.inner);
        self.inner.qsub.enqueue(move || {
            let was_empty = {
                let mut subs = shared.subscribers.lock().unwrap();
                let was_empty = subs.is_empty();
                subs.push(reader);
                was_empty
            };
            if was_empty {
                shared.activate_rmp_reader();
                shared.fire_event(ChannelReaderEvent::FirstCreated);
            }
        });

        id
    }

    pub fn close_channel_reader(&self, id: ChannelReaderId) {
        let shared = Arc::clone(&self.inner);
        self.inner.qsub.enqueue(move || {
            let now_empty = {
                let mut subs = shared.subscribers.lock().unwrap();
                subs.retain(|s| s.id != id);
                subs.is_empty()
            };
            if now_empty {
                shared.deactivate_rmp_reader();
                shared.fire_event(ChannelReaderEvent::LastClosed);
            }
        });
    }

    /// Drains everything currently available from the ring and dispatches
    /// it to matching subscribers, on `Qrmp`. Returns immediately; the
    /// drain happens on the queue's thread.
    pub fn poll(&self) {
        let shared = Arc::clone(&self.inner);
        self.inner.qrmp.enqueue(move || shared.drain_and_dispatch());
    }

    /// Blocks on the bus's notifier forever, polling on every wake-up. Run
    /// this on its own thread.
    pub fn run(&self) -> ! {
        loop {
            let _ = self.inner.notifier.wait();
            self.poll();
        }
    }
}
