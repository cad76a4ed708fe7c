use serde::{Deserialize, Serialize};

use super::event::Action;

/// Outbound intent: "notify subject `to` with `text`", optionally presenting
/// an option set. Rendering is up to the messaging provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub to: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<Vec<ReplyOption>>,
    #[serde(default)]
    pub request_contact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyOption {
    pub label: String,
    pub action: String,
}

impl ReplyOption {
    pub fn new(label: impl Into<String>, action: &Action) -> Self {
        Self {
            label: label.into(),
            action: action.token(),
        }
    }
}

impl Reply {
    pub fn text(to: i64, text: impl Into<String>) -> Self {
        Self {
            to,
            text: text.into(),
            options: vec![],
            request_contact: false,
        }
    }

    pub fn with_options(mut self, options: Vec<Vec<ReplyOption>>) -> Self {
        self.options = options;
        self
    }

    pub fn with_row(mut self, row: Vec<ReplyOption>) -> Self {
        self.options.push(row);
        self
    }

    pub fn requesting_contact(mut self) -> Self {
        self.request_contact = true;
        self
    }

    /// All action tokens offered by this reply, row by row.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.options
            .iter()
            .flat_map(|row| row.iter().map(|o| o.action.as_str()))
    }
}
