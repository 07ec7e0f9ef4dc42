//! Command registry for wirebus.
//!
//! Commands are declared once by id; any number of handlers can then be
//! contributed for a command, and the registry picks the first enabled one
//! at execution time. Registrations are disposable, so contributors can be
//! unloaded without tearing the registry down.

pub mod command;
pub mod error;
pub mod registry;

pub use command::{Command, CommandHandler, HandlerResult};
pub use error::{CommandError, Result};
pub use registry::{CommandRegistry, Registration};
