//! Local transport layer for wirebus.
//!
//! Connects cooperating processes over Unix domain sockets and hands the
//! upper layers a single bidirectional byte pipe ([`PipeStream`]). The
//! framing and RPC crates build on this; nothing here knows about message
//! boundaries.

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use stream::PipeStream;

#[cfg(unix)]
pub use uds::UnixSocketListener;
