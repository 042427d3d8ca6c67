//! `toroni-tp`: the Topic Protocol — channel-addressed pub/sub multiplexed
//! over one [`toroni_rmp`] bus.
//!
//! A bus carries one [`reader_info::TopicReaderInfo`] (an RMP reader-info
//! table plus a generation counter) alongside its RMP ring. An
//! [`async_writer::AsyncWriter`] stamps and frames messages
//! ([`wire`]) off the calling thread, via a staging queue and a dedicated
//! drain thread. A [`reader::TopicReader`] multiplexes any number of
//! [`channel_reader::ChannelReader`] subscriptions over a single underlying
//! RMP reader, filtering each delivered frame by topic match and generation
//! cutoff.

pub mod async_writer;
pub mod channel_reader;
pub mod error;
pub mod reader;
pub mod reader_info;
pub mod wire;

pub use async_writer::{AsyncWriter, BpCallback};
pub use channel_reader::{ChannelHandler, ChannelReaderId};
pub use error::TpError;
pub use reader::{ChannelReaderEvent, EventCallback, TopicReader};
pub use reader_info::TopicReaderInfo;
