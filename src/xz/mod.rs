//! The XZ container: stream framing, block framing, the index, and the
//! reader/writer/statistics front ends.

pub mod block;
pub mod index;
pub mod reader;
pub mod stat;
pub mod stream;
pub mod writer;

pub use block::BlockHeader;
pub use index::IndexRecord;
pub use reader::XzReader;
pub use stat::{stat, walk, ChunkInfo, Info, Walk, WalkControl};
pub use stream::StreamFlags;
pub use writer::XzWriter;
