use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};
use wirebus_frame::{FrameConfig, MessageReader, MessageWriter};
use wirebus_transport::{PipeStream, UnixSocketListener};

use crate::connection::{Connection, RpcTarget};
use crate::error::{Result, RpcError};
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::message::Envelope;

/// Default time allowed for a freshly accepted peer to complete the attach
/// handshake.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Matches the logical service path a peer attaches to.
pub enum PathMatcher {
    /// The path must equal this string exactly.
    Exact(String),
    /// Arbitrary predicate over the attach path.
    Predicate(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl PathMatcher {
    pub fn exact(path: impl Into<String>) -> Self {
        Self::Exact(path.into())
    }

    pub fn predicate(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Box::new(f))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == path,
            Self::Predicate(f) => f(path),
        }
    }
}

impl std::fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(path) => f.debug_tuple("Exact").field(path).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

struct Route {
    matcher: PathMatcher,
    target: Arc<dyn RpcTarget>,
}

/// A socket-bound server that routes attaching peers to registered services.
///
/// Services are registered with [`RpcServer::add_service`]; routes are tried
/// in registration order and the first match wins. Each accepted connection
/// gets its own reader thread and is tracked by the heartbeat monitor.
pub struct RpcServer {
    socket: UnixSocketListener,
    routes: Mutex<Vec<Route>>,
    heartbeat: HeartbeatMonitor,
    frame_config: FrameConfig,
    attach_timeout: Duration,
    next_connection_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl RpcServer {
    /// Bind a server socket with default frame and heartbeat settings.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_config(path, FrameConfig::default(), HeartbeatConfig::default())
    }

    pub fn bind_with_config(
        path: impl AsRef<Path>,
        frame_config: FrameConfig,
        heartbeat_config: HeartbeatConfig,
    ) -> Result<Self> {
        let socket = UnixSocketListener::bind(path.as_ref())?;
        info!(path = %socket.path().display(), "server socket bound");
        Ok(Self {
            socket,
            routes: Mutex::new(Vec::new()),
            heartbeat: HeartbeatMonitor::new(heartbeat_config),
            frame_config,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Register a service route. Routes are matched in registration order.
    pub fn add_service(&self, matcher: PathMatcher, target: Arc<dyn RpcTarget>) {
        lock(&self.routes).push(Route { matcher, target });
    }

    /// Path of the bound socket.
    pub fn local_path(&self) -> PathBuf {
        self.socket.path().to_path_buf()
    }

    /// The heartbeat monitor tracking this server's connections. Call
    /// [`HeartbeatMonitor::start`] on it to enable periodic liveness probes.
    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Accept one peer, run the attach handshake, and start serving it.
    ///
    /// Blocks until a peer connects. A peer that attaches to a path no
    /// route matches is refused with an `attach-err` envelope and reported
    /// as an error here; the server stays usable.
    pub fn accept(&self) -> Result<Arc<Connection>> {
        let stream = self.socket.accept()?;
        if let Some((uid, gid, pid)) = stream.peer_credentials() {
            debug!(uid, gid, pid, "peer connected");
        }

        // The handshake runs under a deadline so a silent peer cannot pin
        // the accept loop's resources. The reader is kept: bytes the peer
        // sent right after its attach are already buffered in it.
        stream.set_read_timeout(Some(self.attach_timeout))?;
        let mut reader =
            MessageReader::with_config(stream.try_clone()?, self.frame_config.clone());
        let mut writer =
            MessageWriter::with_config(stream.try_clone()?, self.frame_config.clone());

        let attach_path = match self.read_attach(&mut reader) {
            Ok(path) => path,
            Err(err) => {
                warn!(%err, "attach handshake failed");
                let _ = stream.shutdown();
                return Err(err);
            }
        };

        let target = match self.resolve(&attach_path) {
            Some(target) => target,
            None => {
                let refusal = Envelope::AttachErr {
                    message: format!("no service registered at {attach_path:?}"),
                };
                if let Ok(payload) = refusal.to_bytes() {
                    let _ = writer.send(&payload);
                }
                let _ = stream.shutdown();
                return Err(RpcError::AttachRejected {
                    path: attach_path,
                    message: "no matching service".to_string(),
                });
            }
        };

        writer.send(&Envelope::AttachOk.to_bytes()?)?;

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (connection, reader) =
            Connection::with_reader(id, stream, reader, self.frame_config.clone())?;
        connection.spawn_reader(reader, Some(target));
        self.heartbeat.track(Arc::clone(&connection));
        info!(id, path = %attach_path, "peer attached");

        Ok(connection)
    }

    fn read_attach(&self, reader: &mut MessageReader<PipeStream>) -> Result<String> {
        let payload = reader.read_message()?;
        match Envelope::from_bytes(&payload)? {
            Envelope::Attach { path } => Ok(path),
            other => Err(RpcError::Protocol(format!(
                "expected attach envelope, got {other:?}"
            ))),
        }
    }

    fn resolve(&self, path: &str) -> Option<Arc<dyn RpcTarget>> {
        lock(&self.routes)
            .iter()
            .find(|route| route.matcher.matches(path))
            .map(|route| Arc::clone(&route.target))
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("path", &self.socket.path())
            .field("routes", &lock(&self.routes).len())
            .finish()
    }
}
