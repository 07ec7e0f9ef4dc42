//! Connection management and RPC for wirebus.
//!
//! This is the layer that turns a raw byte pipe into something a caller can
//! trust: message-level connections with liveness probing, remote service
//! proxies bound to logical paths, and a reconnection-aware client facade
//! that buffers writes across connectivity gaps.

pub mod connection;
pub mod error;
pub mod facade;
pub mod heartbeat;
pub mod message;
pub mod proxy;
pub mod server;

pub use connection::{Connection, ConnectionEvent, ConnectionState, RpcTarget};
pub use error::{Result, RpcError};
pub use facade::{ReconnectingClient, ResourceService};
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use message::{Envelope, RemoteError};
pub use proxy::{connect, connect_with_config, AttachConfig, ServiceProxy};
pub use server::{PathMatcher, RpcServer};
