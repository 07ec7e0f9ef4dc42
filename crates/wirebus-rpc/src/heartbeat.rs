use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use crate::connection::{Connection, ConnectionState};
use crate::message::Envelope;

/// Default interval between heartbeat sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between sweeps. A peer that fails to answer a ping within
    /// one full interval is terminated on the following sweep.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Periodic liveness prober for a set of connections.
///
/// Each sweep clears every tracked connection's liveness flag and sends a
/// ping. A connection whose flag was already clear has spent a whole
/// interval without traffic proving the peer alive, and is terminated.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    connections: Arc<Mutex<Vec<Arc<Connection>>>>,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            connections: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Add a connection to the sweep set. Closed connections are dropped
    /// from the set on the next sweep.
    pub fn track(&self, connection: Arc<Connection>) {
        lock(&self.connections).push(connection);
    }

    /// Number of connections currently tracked.
    pub fn tracked(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Run one sweep: drop closed connections, terminate unresponsive ones,
    /// ping the rest.
    ///
    /// Called periodically by the background thread started with
    /// [`HeartbeatMonitor::start`]; exposed so callers without a background
    /// thread can drive the probe themselves.
    pub fn sweep(&self) {
        sweep_set(&self.connections);
    }

    /// Start the background sweep thread. Idempotent.
    pub fn start(&self) {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return;
        }

        let connections = Arc::clone(&self.connections);
        let stop = Arc::clone(&self.stop);
        let interval = self.config.interval;

        *handle = Some(std::thread::spawn(move || {
            // Sleep in short steps so stop() is responsive even with long
            // heartbeat intervals.
            let step = Duration::from_millis(50).min(interval);
            let mut elapsed = Duration::ZERO;
            loop {
                std::thread::sleep(step);
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                elapsed += step;
                if elapsed >= interval {
                    elapsed = Duration::ZERO;
                    sweep_set(&connections);
                }
            }
        }));
    }

    /// Stop the background thread and wait for it to exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = lock(&self.handle).take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep_set(connections: &Mutex<Vec<Arc<Connection>>>) {
    let snapshot: Vec<Arc<Connection>> = {
        let mut tracked = lock(connections);
        tracked.retain(|conn| conn.state() != ConnectionState::Closed);
        tracked.clone()
    };

    for connection in snapshot {
        if !connection.clear_alive() {
            info!(
                id = connection.id(),
                "peer missed a heartbeat interval; terminating connection"
            );
            connection.terminate();
            continue;
        }
        if let Err(err) = connection.send(&Envelope::Ping) {
            debug!(id = connection.id(), %err, "heartbeat ping failed; terminating");
            connection.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    use wirebus_frame::FrameConfig;
    use wirebus_transport::{PipeStream, UnixSocketListener};

    fn pipe_pair(tag: &str) -> (PipeStream, PipeStream) {
        let dir = std::env::temp_dir().join(format!(
            "wirebus-hb-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let sock_path: PathBuf = dir.join("pair.sock");

        let listener = UnixSocketListener::bind(&sock_path).expect("bind should succeed");
        let path_clone = sock_path.clone();
        let client_thread = std::thread::spawn(move || {
            UnixSocketListener::connect(&path_clone).expect("connect should succeed")
        });
        let server = listener.accept().expect("accept should succeed");
        let client = client_thread.join().expect("client thread should finish");

        (server, client)
    }

    #[test]
    fn responsive_peer_survives_sweeps() {
        let (server_stream, client_stream) = pipe_pair("responsive");

        let (server, server_reader) =
            Connection::open(1, server_stream, FrameConfig::default()).expect("server open");
        server.spawn_reader(server_reader, None);

        let (client, client_reader) =
            Connection::open(0, client_stream, FrameConfig::default()).expect("client open");
        client.spawn_reader(client_reader, None);

        let monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        monitor.track(Arc::clone(&server));

        // First sweep clears the flag and pings; the peer's pong restores
        // liveness before the next sweep.
        monitor.sweep();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !server.is_alive() {
            assert!(Instant::now() < deadline, "pong should restore liveness");
            std::thread::sleep(Duration::from_millis(10));
        }

        monitor.sweep();
        assert_ne!(server.state(), ConnectionState::Closed);
    }

    #[test]
    fn silent_peer_is_terminated_on_second_sweep() {
        let (server_stream, client_stream) = pipe_pair("silent");

        let (server, server_reader) =
            Connection::open(1, server_stream, FrameConfig::default()).expect("server open");
        server.spawn_reader(server_reader, None);

        // The client never reads, so it never pongs.
        let _held_open = client_stream;

        let monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        monitor.track(Arc::clone(&server));

        monitor.sweep();
        assert_ne!(server.state(), ConnectionState::Closed);

        monitor.sweep();
        assert_eq!(server.state(), ConnectionState::Closed);
    }

    #[test]
    fn closed_connections_are_dropped_from_tracking() {
        let (server_stream, client_stream) = pipe_pair("untrack");
        drop(client_stream);

        let (server, server_reader) =
            Connection::open(1, server_stream, FrameConfig::default()).expect("server open");
        server.spawn_reader(server_reader, None);
        server.terminate();

        let monitor = HeartbeatMonitor::new(HeartbeatConfig::default());
        monitor.track(server);
        assert_eq!(monitor.tracked(), 1);

        monitor.sweep();
        assert_eq!(monitor.tracked(), 0);
    }

    #[test]
    fn background_thread_sweeps_on_interval() {
        let (server_stream, client_stream) = pipe_pair("background");
        let _held_open = client_stream;

        let (server, server_reader) =
            Connection::open(1, server_stream, FrameConfig::default()).expect("server open");
        server.spawn_reader(server_reader, None);

        let monitor = HeartbeatMonitor::new(HeartbeatConfig {
            interval: Duration::from_millis(60),
        });
        monitor.track(Arc::clone(&server));
        monitor.start();

        // Two intervals without a pong from the silent peer.
        let deadline = Instant::now() + Duration::from_secs(3);
        while server.state() != ConnectionState::Closed {
            assert!(Instant::now() < deadline, "silent peer should be terminated");
            std::thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();
    }
}
