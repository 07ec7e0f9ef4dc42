//! Length-prefixed message framing for wirebus pipe transports.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. The length prefix is the sole unit of
//! message-boundary truth: the decoder reconstructs exact message
//! boundaries from any chunking or concatenation of the underlying byte
//! stream, including a length header split across deliveries.
//!
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::MessageReader;
pub use writer::MessageWriter;
