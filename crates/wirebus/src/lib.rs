//! Reconnecting RPC over Unix sockets for multi-process applications.
//!
//! wirebus connects logically separate processes over framed Unix-socket
//! pipes: length-prefixed message framing, path-routed service attachment,
//! heartbeat-supervised connections, a reconnection-aware client facade,
//! and an in-process command registry.
//!
//! # Crate Structure
//!
//! - [`transport`] — Unix domain socket transport
//! - [`frame`] — Length-prefixed message framing
//! - [`rpc`] — Connections, servers, proxies, heartbeat, reconnect facade
//! - [`commands`] — Command registry with pluggable handlers

/// Re-export transport types.
pub mod transport {
    pub use wirebus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wirebus_frame::*;
}

/// Re-export rpc types.
pub mod rpc {
    pub use wirebus_rpc::*;
}

/// Re-export command registry types.
pub mod commands {
    pub use wirebus_commands::*;
}
