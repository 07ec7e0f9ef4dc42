use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tracing::debug;

use crate::command::{Command, CommandHandler};
use crate::error::{CommandError, Result};

/// Maximum number of entries kept in the recently-executed list.
const RECENT_LIMIT: usize = 50;

struct HandlerEntry {
    seq: u64,
    handler: Arc<dyn CommandHandler>,
}

#[derive(Default)]
struct Inner {
    commands: HashMap<String, Command>,
    handlers: HashMap<String, Vec<HandlerEntry>>,
    recent: Vec<String>,
    next_seq: u64,
}

/// Registry of commands and their contributed handlers.
///
/// Cloning is cheap and all clones share state, so the registry can be
/// handed to every contributor.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|err| err.into_inner())
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command declaration, optionally with its primary handler.
    /// Fails if the id is taken; ids are global and a silent overwrite
    /// would hijack existing handlers.
    ///
    /// Disposing the returned registration removes the command and every
    /// handler contributed for it.
    pub fn register_command(
        &self,
        command: Command,
        handler: Option<Arc<dyn CommandHandler>>,
    ) -> Result<Registration> {
        let id = command.id.clone();
        {
            let mut inner = lock(&self.inner);
            if inner.commands.contains_key(&id) {
                return Err(CommandError::AlreadyRegistered { id });
            }
            inner.commands.insert(id.clone(), command);
        }
        if let Some(handler) = handler {
            self.register_handler(&id, handler);
        }
        debug!(id = %id, "command registered");
        Ok(Registration::new(
            Arc::downgrade(&self.inner),
            RegistrationKind::Command { id },
        ))
    }

    /// Contribute a handler for a command id, appended after existing
    /// handlers. Resolution walks the list in registration order.
    pub fn register_handler(
        &self,
        command_id: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Registration {
        let seq = {
            let mut inner = lock(&self.inner);
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner
                .handlers
                .entry(command_id.to_string())
                .or_default()
                .push(HandlerEntry { seq, handler });
            seq
        };
        Registration::new(
            Arc::downgrade(&self.inner),
            RegistrationKind::Handler {
                id: command_id.to_string(),
                seq,
            },
        )
    }

    /// Remove a command and its handlers directly by id. Returns whether a
    /// command was removed.
    pub fn unregister_command(&self, id: &str) -> bool {
        let mut inner = lock(&self.inner);
        let removed = inner.commands.remove(id).is_some();
        if removed {
            inner.handlers.remove(id);
            inner.recent.retain(|recent| recent != id);
            debug!(id = %id, "command unregistered");
        }
        removed
    }

    /// The registered command for an id, if any.
    pub fn command(&self, id: &str) -> Option<Command> {
        lock(&self.inner).commands.get(id).cloned()
    }

    /// All registered command ids, sorted.
    pub fn command_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner).commands.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All registered commands, sorted by id.
    pub fn commands(&self) -> Vec<Command> {
        let mut commands: Vec<Command> = lock(&self.inner).commands.values().cloned().collect();
        commands.sort_by(|a, b| a.id.cmp(&b.id));
        commands
    }

    /// First handler in registration order that is enabled for the
    /// arguments.
    pub fn active_handler(&self, id: &str, args: &Value) -> Option<Arc<dyn CommandHandler>> {
        self.find_handler(id, |handler| handler.is_enabled(args))
    }

    /// First handler that considers the command visible.
    pub fn visible_handler(&self, id: &str, args: &Value) -> Option<Arc<dyn CommandHandler>> {
        self.find_handler(id, |handler| handler.is_visible(args))
    }

    /// First handler that renders the command as toggled on.
    pub fn toggled_handler(&self, id: &str, args: &Value) -> Option<Arc<dyn CommandHandler>> {
        self.find_handler(id, |handler| handler.is_toggled(args))
    }

    /// Whether some handler is enabled for the command and arguments.
    pub fn is_enabled(&self, id: &str, args: &Value) -> bool {
        self.active_handler(id, args).is_some()
    }

    /// Whether some handler considers the command visible.
    pub fn is_visible(&self, id: &str, args: &Value) -> bool {
        self.visible_handler(id, args).is_some()
    }

    /// Whether some handler renders the command as toggled.
    pub fn is_toggled(&self, id: &str, args: &Value) -> bool {
        self.toggled_handler(id, args).is_some()
    }

    /// Execute a command via its first enabled handler.
    ///
    /// A declared `Command` is not required: handlers contributed for an
    /// id without a descriptor are dispatched the same way. Successful
    /// executions land at the front of the recent list.
    pub fn execute(&self, id: &str, args: &Value) -> Result<Value> {
        let handler = self
            .active_handler(id, args)
            .ok_or_else(|| CommandError::NotExecutable { id: id.to_string() })?;

        match handler.execute(args) {
            Ok(result) => {
                self.add_recent(id);
                Ok(result)
            }
            Err(err) => Err(CommandError::Failed {
                id: id.to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Recently executed commands, most recent first.
    pub fn recent(&self) -> Vec<Command> {
        let inner = lock(&self.inner);
        inner
            .recent
            .iter()
            .filter_map(|id| inner.commands.get(id).cloned())
            .collect()
    }

    /// Clear the recently-executed list.
    pub fn clear_recent(&self) {
        lock(&self.inner).recent.clear();
    }

    fn find_handler(
        &self,
        id: &str,
        predicate: impl Fn(&dyn CommandHandler) -> bool,
    ) -> Option<Arc<dyn CommandHandler>> {
        lock(&self.inner).handlers.get(id).and_then(|entries| {
            entries
                .iter()
                .find(|entry| predicate(entry.handler.as_ref()))
                .map(|entry| Arc::clone(&entry.handler))
        })
    }

    fn add_recent(&self, id: &str) {
        let mut inner = lock(&self.inner);
        inner.recent.retain(|recent| recent != id);
        inner.recent.insert(0, id.to_string());
        inner.recent.truncate(RECENT_LIMIT);
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("CommandRegistry")
            .field("commands", &inner.commands.len())
            .field("handlers", &inner.handlers.len())
            .finish()
    }
}

#[derive(Debug)]
enum RegistrationKind {
    Command { id: String },
    Handler { id: String, seq: u64 },
}

/// Handle that undoes a registration.
///
/// Disposal is explicit and idempotent; dropping the handle leaves the
/// registration in place.
#[derive(Debug)]
pub struct Registration {
    inner: Weak<Mutex<Inner>>,
    kind: RegistrationKind,
    disposed: AtomicBool,
}

impl Registration {
    fn new(inner: Weak<Mutex<Inner>>, kind: RegistrationKind) -> Self {
        Self {
            inner,
            kind,
            disposed: AtomicBool::new(false),
        }
    }

    /// The command id this registration belongs to.
    pub fn command_id(&self) -> &str {
        match &self.kind {
            RegistrationKind::Command { id } | RegistrationKind::Handler { id, .. } => id,
        }
    }

    /// Undo the registration. Later calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        match &self.kind {
            RegistrationKind::Command { id } => {
                inner.commands.remove(id);
                inner.handlers.remove(id);
                inner.recent.retain(|recent| recent != id);
                debug!(id = %id, "command unregistered");
            }
            RegistrationKind::Handler { id, seq } => {
                if let Some(entries) = inner.handlers.get_mut(id) {
                    entries.retain(|entry| entry.seq != *seq);
                    if entries.is_empty() {
                        inner.handlers.remove(id);
                    }
                }
            }
        }
    }
}
