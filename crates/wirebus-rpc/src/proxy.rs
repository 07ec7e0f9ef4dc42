use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;
use wirebus_frame::{FrameConfig, MessageReader, MessageWriter};
use wirebus_transport::UnixSocketListener;

use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::facade::ResourceService;
use crate::message::Envelope;

/// Settings for the client side of the attach handshake.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// How long to wait for the server's attach response.
    pub timeout: Duration,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to a server socket and attach to a logical service path.
pub fn connect(socket: impl AsRef<Path>, service_path: &str) -> Result<ServiceProxy> {
    connect_with_config(
        socket,
        service_path,
        AttachConfig::default(),
        FrameConfig::default(),
    )
}

pub fn connect_with_config(
    socket: impl AsRef<Path>,
    service_path: &str,
    attach_config: AttachConfig,
    frame_config: FrameConfig,
) -> Result<ServiceProxy> {
    let stream = UnixSocketListener::connect(socket.as_ref())?;
    stream.set_read_timeout(Some(attach_config.timeout))?;

    // The handshake reader stays alive past the handshake: the server may
    // start pinging before we look at the stream again, and those bytes
    // land in this reader's buffer.
    let mut reader = MessageReader::with_config(stream.try_clone()?, frame_config.clone());
    let mut writer = MessageWriter::with_config(stream.try_clone()?, frame_config.clone());

    let attach = Envelope::Attach {
        path: service_path.to_string(),
    };
    writer.send(&attach.to_bytes()?)?;

    let payload = reader.read_message()?;
    match Envelope::from_bytes(&payload)? {
        Envelope::AttachOk => {}
        Envelope::AttachErr { message } => {
            return Err(RpcError::AttachRejected {
                path: service_path.to_string(),
                message,
            });
        }
        other => {
            return Err(RpcError::Protocol(format!(
                "expected attach response, got {other:?}"
            )));
        }
    }

    let (connection, reader) = Connection::with_reader(0, stream, reader, frame_config)?;
    connection.spawn_reader(reader, None);
    debug!(path = %service_path, "attached to service");

    Ok(ServiceProxy {
        connection,
        path: service_path.to_string(),
    })
}

/// Client-side handle for calling methods on a remote service.
#[derive(Debug)]
pub struct ServiceProxy {
    connection: Arc<Connection>,
    path: String,
}

impl ServiceProxy {
    /// The logical service path this proxy is attached to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The underlying connection, for lifecycle subscriptions.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Call a remote method and block for its result.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.connection.request(method, params)
    }

    /// Send a fire-and-forget notification to the remote service.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.connection.notify(method, params)
    }

    /// Close the underlying connection.
    pub fn close(&self) {
        self.connection.terminate();
    }
}

impl ResourceService for ServiceProxy {
    fn read(&self, resource: &str) -> Result<Value> {
        self.call("read", json!({ "resource": resource }))
    }

    fn save(&self, resource: &str, content: &Value) -> Result<()> {
        self.call(
            "save",
            json!({ "resource": resource, "content": content }),
        )?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        ServiceProxy::close(self);
        Ok(())
    }
}
