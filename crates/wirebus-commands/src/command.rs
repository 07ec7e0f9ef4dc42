use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative description of a command.
///
/// The id is the only required part; label, icon and category exist for
/// user-facing surfaces like palettes and menus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Command {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            icon_class: None,
            category: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_icon_class(mut self, icon_class: impl Into<String>) -> Self {
        self.icon_class = Some(icon_class.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Result of a handler execution; failures are surfaced as
/// [`CommandError::Failed`](crate::CommandError::Failed) by the registry.
pub type HandlerResult = std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// One contributed implementation of a command.
///
/// Several handlers may be registered for the same command id; the registry
/// asks each in turn whether it is enabled for the given arguments and runs
/// the first one that is.
pub trait CommandHandler: Send + Sync {
    /// Run the command.
    fn execute(&self, args: &Value) -> HandlerResult;

    /// Whether this handler can run with the given arguments.
    fn is_enabled(&self, _args: &Value) -> bool {
        true
    }

    /// Whether surfaces like menus should show the command for the given
    /// arguments.
    fn is_visible(&self, _args: &Value) -> bool {
        true
    }

    /// Whether the command renders as toggled on, for toggle-style
    /// commands.
    fn is_toggled(&self, _args: &Value) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_optional_fields() {
        let command = Command::new("editor.save")
            .with_label("Save")
            .with_category("File");
        assert_eq!(command.id, "editor.save");
        assert_eq!(command.label.as_deref(), Some("Save"));
        assert_eq!(command.icon_class, None);
        assert_eq!(command.category.as_deref(), Some("File"));
    }

    #[test]
    fn optional_fields_are_omitted_from_json() {
        let json = serde_json::to_value(Command::new("bare")).expect("serialize");
        assert_eq!(json, serde_json::json!({"id": "bare"}));
    }
}
