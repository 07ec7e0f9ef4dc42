/// Errors that can occur in command registration and execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A command with this id is already registered.
    #[error("a command with id '{id}' is already registered")]
    AlreadyRegistered { id: String },

    /// No handler is enabled for the given id and arguments.
    #[error("the command '{id}' cannot be executed")]
    NotExecutable { id: String },

    /// A handler ran and failed.
    #[error("command '{id}' failed: {message}")]
    Failed { id: String, message: String },
}

pub type Result<T> = std::result::Result<T, CommandError>;
