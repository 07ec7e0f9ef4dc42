use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use serde_json::Value;
use tracing::{debug, warn};
use wirebus_frame::{FrameConfig, FrameError, MessageReader, MessageWriter};
use wirebus_transport::PipeStream;

use crate::error::{Result, RpcError};
use crate::message::{Envelope, RemoteError};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Notification emitted to connection event subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
}

/// The local object whose methods a connection exposes to its peer.
///
/// The service router resolves a logical path to one of these; its methods
/// are then callable through a remote [`ServiceProxy`](crate::ServiceProxy).
pub trait RpcTarget: Send + Sync {
    /// Handle a request and produce a result or an application error.
    fn handle_request(&self, method: &str, params: Value)
        -> std::result::Result<Value, RemoteError>;

    /// Handle a fire-and-forget notification. Ignored by default.
    fn handle_notification(&self, method: &str, params: Value) {
        let _ = (method, params);
    }
}

type ReplyResult = std::result::Result<Value, RemoteError>;

/// A message-level connection over a framed pipe.
///
/// Each connection's mutable state is touched only by its own reader thread,
/// by the shared heartbeat sweep, and by callers holding the relevant mutex.
pub struct Connection {
    id: u64,
    state: Mutex<ConnectionState>,
    alive: AtomicBool,
    writer: Mutex<MessageWriter<PipeStream>>,
    /// Extra handle onto the pipe, used only to shut it down. Shutting down
    /// unblocks the reader thread of this connection.
    control: PipeStream,
    pending: Mutex<HashMap<u64, mpsc::Sender<ReplyResult>>>,
    next_request_id: AtomicU64,
    subscribers: Mutex<Vec<mpsc::Sender<ConnectionEvent>>>,
}

/// Locks recovering from poisoning: a panicked holder never leaves
/// connection maps half-updated in a way that matters here.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl Connection {
    /// Open a connection over an already-attached pipe.
    ///
    /// Returns the connection plus the reader half; pass the reader to
    /// [`Connection::spawn_reader`] to start dispatching incoming envelopes.
    pub fn open(
        id: u64,
        stream: PipeStream,
        config: FrameConfig,
    ) -> Result<(Arc<Self>, MessageReader<PipeStream>)> {
        let reader_stream = stream.try_clone()?;
        let reader = MessageReader::with_config(reader_stream, config.clone());
        Self::with_reader(id, stream, reader, config)
    }

    /// Open a connection reusing a reader that already consumed part of the
    /// stream, so buffered bytes read during an attach handshake are not
    /// lost. Read and write timeouts are reset to the given config.
    pub fn with_reader(
        id: u64,
        stream: PipeStream,
        reader: MessageReader<PipeStream>,
        config: FrameConfig,
    ) -> Result<(Arc<Self>, MessageReader<PipeStream>)> {
        let control = stream.try_clone()?;
        // Timeouts are a property of the socket shared by all clones.
        control.set_read_timeout(config.read_timeout)?;
        let writer = MessageWriter::with_config_pipe(stream, config)?;

        let connection = Arc::new(Self {
            id,
            state: Mutex::new(ConnectionState::Open),
            alive: AtomicBool::new(true),
            writer: Mutex::new(writer),
            control,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        });

        Ok((connection, reader))
    }

    /// Connection identifier (assigned by the accepting side).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Whether the peer has proven liveness since the last heartbeat sweep.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn set_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag, returning its previous value. Called once
    /// per heartbeat sweep.
    pub(crate) fn clear_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Subscribe to lifecycle events.
    ///
    /// The current state is replayed to the new subscriber: `Opened` if the
    /// connection is open, `Closed` if it has already closed.
    pub fn subscribe(&self) -> mpsc::Receiver<ConnectionEvent> {
        let (tx, rx) = mpsc::channel();
        // Hold the subscribers lock across the state check: a concurrent
        // close must either be seen here or emit to the pushed sender.
        let mut subscribers = lock(&self.subscribers);
        match self.state() {
            ConnectionState::Open => {
                let _ = tx.send(ConnectionEvent::Opened);
            }
            ConnectionState::Closed => {
                let _ = tx.send(ConnectionEvent::Closed);
            }
            _ => {}
        }
        subscribers.push(tx);
        rx
    }

    /// Send one envelope to the peer.
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        let payload = envelope.to_bytes()?;
        lock(&self.writer).send(&payload)?;
        Ok(())
    }

    /// Send a request and block for the matching reply.
    ///
    /// There is deliberately no per-call timeout; a dead peer is detected
    /// and terminated by the heartbeat sweep, which fails all pending
    /// requests on this connection.
    pub fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.state() != ConnectionState::Open {
            return Err(RpcError::Disconnected(
                "connection is not open".to_string(),
            ));
        }

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        lock(&self.pending).insert(id, tx);

        let envelope = Envelope::Request {
            id,
            method: method.to_string(),
            params,
        };
        if let Err(err) = self.send(&envelope) {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        match rx.recv() {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(remote)) => Err(RpcError::Remote(remote)),
            Err(_) => Err(RpcError::Disconnected(
                "connection closed while awaiting reply".to_string(),
            )),
        }
    }

    /// Send a fire-and-forget notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.send(&Envelope::Notify {
            method: method.to_string(),
            params,
        })
    }

    /// Close the connection.
    ///
    /// Unconditional: shuts the pipe down, fails all pending requests, and
    /// emits a `Closed` event. The heartbeat sweep calls this for peers that
    /// missed a ping/pong round trip.
    pub fn terminate(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closing;
        }
        if let Err(err) = self.control.shutdown() {
            debug!(id = self.id, %err, "pipe shutdown failed");
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        // Dropping the reply senders wakes every blocked requester with a
        // disconnect error.
        lock(&self.pending).clear();
        self.emit(ConnectionEvent::Closed);
        debug!(id = self.id, "connection closed");
    }

    fn emit(&self, event: ConnectionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event).is_ok());
    }

    fn complete(&self, request_id: u64, result: ReplyResult) {
        match lock(&self.pending).remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(
                id = self.id,
                request_id, "reply for unknown request id; dropping"
            ),
        }
    }

    /// Spawn the reader thread that dispatches incoming envelopes.
    ///
    /// `target` is the local object served to the peer; pass `None` for a
    /// pure client connection (pings are still answered).
    pub fn spawn_reader(
        self: &Arc<Self>,
        mut reader: MessageReader<PipeStream>,
        target: Option<Arc<dyn RpcTarget>>,
    ) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        std::thread::spawn(move || {
            loop {
                let payload = match reader.read_message() {
                    Ok(payload) => payload,
                    Err(FrameError::ConnectionClosed) => {
                        debug!(id = connection.id, "peer closed the pipe");
                        break;
                    }
                    Err(err) => {
                        warn!(id = connection.id, %err, "read failed; terminating connection");
                        break;
                    }
                };

                let envelope = match Envelope::from_bytes(&payload) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        // Malformed envelope: the stream can no longer be
                        // trusted, treat like a framing error.
                        warn!(id = connection.id, %err, "malformed envelope; terminating");
                        break;
                    }
                };

                match envelope {
                    Envelope::Ping => {
                        if connection.send(&Envelope::Pong).is_err() {
                            break;
                        }
                    }
                    Envelope::Pong => connection.set_alive(),
                    Envelope::Reply { id, result } => connection.complete(id, Ok(result)),
                    Envelope::ReplyErr { id, error } => connection.complete(id, Err(error)),
                    Envelope::Request { id, method, params } => {
                        let reply = match &target {
                            Some(target) => match target.handle_request(&method, params) {
                                Ok(result) => Envelope::Reply { id, result },
                                Err(error) => Envelope::ReplyErr { id, error },
                            },
                            None => Envelope::ReplyErr {
                                id,
                                error: RemoteError::method_not_found(&method),
                            },
                        };
                        if connection.send(&reply).is_err() {
                            break;
                        }
                    }
                    Envelope::Notify { method, params } => {
                        if let Some(target) = &target {
                            target.handle_notification(&method, params);
                        }
                    }
                    Envelope::Attach { .. } | Envelope::AttachOk | Envelope::AttachErr { .. } => {
                        warn!(
                            id = connection.id,
                            "attach envelope after connection opened; ignoring"
                        );
                    }
                }
            }
            connection.terminate();
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}
