//! A single subscriber's identity: the channel it watches, whether it wants
//! descendant channels too, the generation it was created at, and the
//! handler that receives matching payloads.

use std::sync::Mutex;

/// Invoked with a message's raw payload once it has passed the generation
/// gate and topic match.
pub type ChannelHandler = Box<dyn FnMut(&[u8]) + Send>;

/// Opaque identity returned by [`crate::reader::TopicReader::create_channel_reader`],
/// used to close that subscription later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelReaderId(pub(crate) u64);

pub(crate) struct ChannelReader {
    pub(crate) id: ChannelReaderId,
    pub(crate) channel: String,
    pub(crate) handle_descendants: bool,
    pub(crate) generation: u64,
    pub(crate) handler: Mutex<ChannelHandler>,
}

impl ChannelReader {
    pub(crate) fn dispatch(&self, decoded: &crate::wire::Decoded<'_>) {
        let mut handler = self.handler.lock().unwrap();
        handler(decoded.data);
    }
}
