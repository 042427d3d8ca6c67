//! `toroni-rmp`: the Reliable Message Protocol — a single-writer,
//! many-reader byte ring over shared memory.
//!
//! One [`ring::ByteRing`] plus one [`reader_info::ReaderInfoTable`] make up
//! a bus. A [`writer::Writer`] frames and writes messages under the ring's
//! robust mutex, detecting when a write would overrun a still-live reader.
//! A [`reader_bp::BackpressureReader`] owns a slot in the table and walks
//! forward from its own cursor via [`reader::StatelessReader`], which is
//! also usable directly by callers that don't need slot-based backpressure
//! accounting (e.g. a diagnostic tail that's allowed to be lossy).

pub mod copy_confirm;
pub mod error;
pub mod frame;
pub mod position;
pub mod reader;
pub mod reader_bp;
pub mod reader_info;
pub mod ring;
pub mod writer;

pub use copy_confirm::{CopyAll, CopyConfirm};
pub use error::RmpError;
pub use reader::{ReadOutcome, StatelessReader};
pub use reader_bp::BackpressureReader;
pub use reader_info::ReaderInfoTable;
pub use ring::{ByteRing, RingConfig};
pub use writer::{BackpressureHandler, Writer};
