use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wirebus_commands::{Command, CommandRegistry};
use wirebus_frame::FrameConfig;
use wirebus_rpc::{
    HeartbeatConfig, PathMatcher, RemoteError, RpcError, RpcServer, RpcTarget,
};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let heartbeat_interval = parse_duration(&args.heartbeat_interval)?;
    let server = RpcServer::bind_with_config(
        &args.path,
        FrameConfig::default(),
        HeartbeatConfig {
            interval: heartbeat_interval,
        },
    )
    .map_err(|err| rpc_error("bind failed", err))?;

    server.add_service(PathMatcher::exact("/services/echo"), Arc::new(EchoTarget));
    server.add_service(
        PathMatcher::exact("/services/store"),
        Arc::new(StoreTarget::default()),
    );
    server.add_service(
        PathMatcher::exact("/services/commands"),
        Arc::new(CommandTarget::with_builtins()?),
    );
    server.heartbeat().start();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    tracing::info!(path = %args.path.display(), "serving; press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        match server.accept() {
            Ok(_) => {}
            // A refused attach is the peer's problem, not the server's.
            Err(RpcError::AttachRejected { path, .. }) => {
                tracing::warn!(path = %path, "refused attach");
            }
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                return Err(rpc_error("accept failed", err));
            }
        }
    }

    server.heartbeat().stop();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Answers `echo` with its own parameters.
struct EchoTarget;

impl RpcTarget for EchoTarget {
    fn handle_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RemoteError> {
        match method {
            "echo" => Ok(params),
            other => Err(RemoteError::method_not_found(other)),
        }
    }
}

/// In-memory resource store speaking the read/save/close protocol the
/// [`ResourceService`](wirebus_rpc::ResourceService) proxy impl expects.
#[derive(Default)]
struct StoreTarget {
    resources: Mutex<std::collections::HashMap<String, Value>>,
}

impl RpcTarget for StoreTarget {
    fn handle_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RemoteError> {
        let resource = params
            .get("resource")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::internal("missing resource"))?
            .to_string();
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        match method {
            "read" => resources
                .get(&resource)
                .cloned()
                .ok_or_else(|| RemoteError::internal(format!("unknown resource {resource}"))),
            "save" => {
                let content = params
                    .get("content")
                    .cloned()
                    .ok_or_else(|| RemoteError::internal("missing content"))?;
                resources.insert(resource, content);
                Ok(Value::Null)
            }
            other => Err(RemoteError::method_not_found(other)),
        }
    }
}

/// Exposes a command registry over the wire: method names are command ids.
struct CommandTarget {
    registry: CommandRegistry,
}

impl CommandTarget {
    fn with_builtins() -> CliResult<Self> {
        let registry = CommandRegistry::new();
        registry
            .register_command(
                Command::new("echo").with_label("Echo arguments"),
                Some(Arc::new(EchoCommand)),
            )
            .map_err(|err| CliError::new(INTERNAL, format!("builtin registration: {err}")))?;
        registry
            .register_command(
                Command::new("shout").with_label("Uppercase a string"),
                Some(Arc::new(ShoutCommand)),
            )
            .map_err(|err| CliError::new(INTERNAL, format!("builtin registration: {err}")))?;
        registry
            .register_command(
                Command::new("list").with_label("List registered commands"),
                Some(Arc::new(ListCommand {
                    registry: registry.clone(),
                })),
            )
            .map_err(|err| CliError::new(INTERNAL, format!("builtin registration: {err}")))?;
        Ok(Self { registry })
    }
}

impl RpcTarget for CommandTarget {
    fn handle_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<Value, RemoteError> {
        self.registry.execute(method, &params).map_err(|err| match err {
            wirebus_commands::CommandError::NotExecutable { .. } => {
                RemoteError::method_not_found(method)
            }
            other => RemoteError::internal(other.to_string()),
        })
    }
}

struct EchoCommand;

impl wirebus_commands::CommandHandler for EchoCommand {
    fn execute(&self, args: &Value) -> wirebus_commands::HandlerResult {
        Ok(args.clone())
    }
}

struct ShoutCommand;

impl wirebus_commands::CommandHandler for ShoutCommand {
    fn execute(&self, args: &Value) -> wirebus_commands::HandlerResult {
        let text = args
            .as_str()
            .or_else(|| args.get("text").and_then(Value::as_str))
            .ok_or("shout needs a string argument")?;
        Ok(json!(text.to_uppercase()))
    }
}

struct ListCommand {
    registry: CommandRegistry,
}

impl wirebus_commands::CommandHandler for ListCommand {
    fn execute(&self, _args: &Value) -> wirebus_commands::HandlerResult {
        Ok(json!(self.registry.command_ids()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shout_uppercases_plain_and_object_arguments() {
        let target = CommandTarget::with_builtins().expect("builtins should register");
        assert_eq!(
            target
                .handle_request("shout", json!("quiet"))
                .expect("shout"),
            json!("QUIET")
        );
        assert_eq!(
            target
                .handle_request("shout", json!({"text": "also quiet"}))
                .expect("shout"),
            json!("ALSO QUIET")
        );
    }

    #[test]
    fn unknown_command_maps_to_method_not_found() {
        let target = CommandTarget::with_builtins().expect("builtins should register");
        let err = target.handle_request("ghost", Value::Null).unwrap_err();
        assert_eq!(err.code, wirebus_rpc::message::CODE_METHOD_NOT_FOUND);
    }

    #[test]
    fn list_reports_the_builtin_command_ids() {
        let target = CommandTarget::with_builtins().expect("builtins should register");
        let listed = target.handle_request("list", Value::Null).expect("list");
        assert_eq!(listed, json!(["echo", "list", "shout"]));
    }

    #[test]
    fn store_round_trips_content() {
        let target = StoreTarget::default();
        target
            .handle_request("save", json!({"resource": "a", "content": {"n": 1}}))
            .expect("save");
        assert_eq!(
            target
                .handle_request("read", json!({"resource": "a"}))
                .expect("read"),
            json!({"n": 1})
        );
    }
}
