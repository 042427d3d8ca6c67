//! Non-blocking publish path: `post` hands a message to a staging queue and
//! returns immediately, a dedicated drain thread does the actual RMP write
//! and multicast wake-up.

use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use toroni_rmp::{ByteRing, Writer};
use toroni_sys::{MpscStagingQueue, Notifier, SerialWorkQueue};

use crate::error::TpError;
use crate::reader_info::TopicReaderInfo;
use crate::wire;

/// `(bp_pos, free_pos) -> keep_retrying`, forwarded verbatim from
/// [`toroni_rmp::BackpressureHandler`].
pub type BpCallback = Box<dyn FnMut(u64, u64) -> bool + Send>;

struct StagedMessage {
    bytes: Arc<Vec<u8>>,
}

struct Shared {
    ring: Arc<ByteRing>,
    topic_info: Arc<TopicReaderInfo>,
    staging: MpscStagingQueue<StagedMessage>,
    work: SerialWorkQueue,
    bp_callback: Mutex<BpCallback>,
    notifier: Notifier,
    multicast_addr: Ipv4Addr,
    multicast_port: u16,
}

impl Shared {
    fn notify_all_readers(&self) {
        self.ring.notification_count().fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.notifier.send(self.multicast_addr, self.multicast_port) {
            tracing::warn!(error = %err, "failed to notify readers of new data");
        }
    }
}

/// Owns the publish side of one bus: one RMP writer, one staging queue, and
/// one drain thread. Cheap to clone — every clone shares the same queue and
/// thread.
#[derive(Clone)]
pub struct AsyncWriter {
    inner: Arc<Shared>,
}

impl AsyncWriter {
    pub fn new(
        ring: Arc<ByteRing>,
        topic_info: Arc<TopicReaderInfo>,
        notifier: Notifier,
        multicast_addr: Ipv4Addr,
        multicast_port: u16,
        bp_callback: BpCallback,
    ) -> Self {
        let inner = Arc::new(Shared {
            ring,
            topic_info,
            staging: MpscStagingQueue::new(),
            work: SerialWorkQueue::new("toroni-tp-writer"),
            bp_callback: Mutex::new(bp_callback),
            notifier,
            multicast_addr,
            multicast_port,
        });
        Self { inner }
    }

    pub fn max_message_size(&self) -> usize {
        self.inner.ring.config().max_message_size() as usize
    }

    /// Serializes `data` for `channel`, stamping it with the bus's current
    /// generation so subscribers created after this call won't see it.
    pub fn create_message(
        &self,
        channel: &str,
        data: &[u8],
        post_to_descendants: bool,
    ) -> Result<Arc<Vec<u8>>, TpError> {
        if channel.as_bytes().contains(&0) {
            return Err(TpError::InvalidChannelName(channel.to_string()));
        }
        let size = wire::serialized_size(channel, data.len());
        let max = self.max_message_size();
        if size > max {
            return Err(TpError::MessageTooLarge {
                channel: channel.to_string(),
                size,
                max,
            });
        }

        let gen = self.inner.topic_info.next_generation();
        let mut buf = Vec::with_capacity(size);
        wire::serialize(gen, post_to_descendants, channel, data, &mut buf);
        Ok(Arc::new(buf))
    }

    /// Enqueues a message built by [`Self::create_message`] and returns
    /// immediately. The drain thread picks it up on its own schedule.
    pub fn post(&self, message: Arc<Vec<u8>>) {
        let started = self.inner.staging.enqueue(StagedMessage { bytes: message });
        if started {
            let shared = Arc::clone(&self.inner);
            self.inner.work.enqueue(move || Self::drain_loop(shared));
        }
    }

    /// Runs on the serial work queue's thread. Drains the staging queue to
    /// empty, writing each message through RMP, then checks again: if the
    /// queue is still empty when it checks, it disarms and returns; any
    /// `post` after that point re-arms by re-enqueueing this closure.
    fn drain_loop(shared: Arc<Shared>) {
        loop {
            let batch = shared.staging.drain();
            if batch.is_empty() {
                shared.notify_all_readers();
                return;
            }

            let writer = Writer::new(Arc::clone(&shared.ring), shared.topic_info.readers_arc());
            for msg in batch {
                let shared_for_bp = Arc::clone(&shared);
                writer.write_ex(&msg.bytes, &mut move |bp_pos, free_pos| {
                    shared_for_bp.notify_all_readers();
                    let mut cb = shared_for_bp.bp_callback.lock().unwrap();
                    cb(bp_pos, free_pos)
                });
            }
        }
    }
}
