use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SessionError;

/// Identity of a page element as reported by the tracking script.
///
/// Not guaranteed to be unique: the same descriptor may match zero, one or
/// many live nodes. Use [`crate::resolver::resolve`] to turn it into a handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub text_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ElementDescriptor {
    /// Validate an untyped payload pulled from the page.
    ///
    /// Unknown fields are ignored, non-string attribute values are dropped,
    /// empty `xpath`/`id` strings count as absent and the tag is upper-cased.
    pub fn from_payload(payload: &Value) -> Result<Self, SessionError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| SessionError::InvalidDescriptor("payload is not an object".into()))?;

        let tag_name = obj
            .get("tagName")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::InvalidDescriptor("missing tagName".into()))?
            .to_ascii_uppercase();

        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let attributes = obj
            .get("attributes")
            .and_then(Value::as_object)
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            tag_name,
            xpath: text("xpath"),
            id: text("id"),
            text_content: obj
                .get("textContent")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            // value is kept verbatim: whitespace in an input is meaningful
            value: obj.get("value").and_then(Value::as_str).map(String::from),
            attributes,
        })
    }

    /// Short form for operator-facing messages.
    pub fn summary(&self) -> String {
        let text: String = self.text_content.trim().chars().take(50).collect();
        format!("<{}> '{}'", self.tag_name, text)
    }
}

/// One selectable item of a `<select>` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub value: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Click,
    Type,
    Select,
    Ignore,
    Finish,
}

impl ActionKind {
    /// Candidate action for a freshly locked element, inferred from its tag.
    pub fn suggested_for(tag_name: &str) -> Option<Self> {
        match tag_name.to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INPUT" | "TEXTAREA" => Some(Self::Type),
            "BUTTON" | "A" | "DIV" | "SPAN" | "LI" | "IMG" => Some(Self::Click),
            _ => None,
        }
    }

    /// Whether this kind drives the page (and therefore needs a locked element).
    pub fn touches_page(self) -> bool {
        matches!(self, Self::Click | Self::Type | Self::Select)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Type => "type",
            Self::Select => "select",
            Self::Ignore => "ignore",
            Self::Finish => "finish",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One confirmed operator action. Never modified once appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub element: ElementDescriptor,
    #[serde(default)]
    pub secondary_elements: Vec<ElementDescriptor>,
    pub timestamp: DateTime<Local>,
    /// Path relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// False when the page rejected the automated interaction.
    pub executed: bool,
}

/// The task currently being annotated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSession {
    pub task_id: String,
    pub description: String,
    pub url: String,
    pub started_at: DateTime<Local>,
    pub actions: Vec<ActionRecord>,
}

impl TaskSession {
    pub fn new(description: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            task_id: new_task_id(),
            description: description.into(),
            url: url.into(),
            started_at: Local::now(),
            actions: Vec::new(),
        }
    }
}

/// Opaque 8-character task token.
pub fn new_task_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    BrowserReady,
    Active,
    Finishing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::BrowserReady => "browser-ready",
            Self::Active => "active",
            Self::Finishing => "finishing",
        };
        f.write_str(s)
    }
}

/// The single element currently selected for the next action.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedElement {
    pub descriptor: ElementDescriptor,
    pub suggested: ActionKind,
    /// Populated only for `<select>` elements.
    pub options: Vec<DropdownOption>,
}

/// Snapshot of engine state consumed by the operator console.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: SessionStatus,
    pub task_id: Option<String>,
    pub locked_tag: Option<String>,
    pub locked_text: Option<String>,
    pub suggested_action: Option<ActionKind>,
    pub suggested_value: Option<String>,
    pub options: Vec<DropdownOption>,
    pub action_count: usize,
}

pub const DEFAULT_URL: &str = "https://www.digikala.com/";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_normalized() {
        let d = ElementDescriptor::from_payload(&json!({
            "tagName": "input",
            "xpath": "",
            "id": "q",
            "textContent": "  ",
            "value": " hi ",
            "attributes": { "name": "q", "tabindex": 3 },
            "extra": true
        }))
        .unwrap();
        assert_eq!(d.tag_name, "INPUT");
        assert_eq!(d.xpath, None);
        assert_eq!(d.id.as_deref(), Some("q"));
        assert_eq!(d.value.as_deref(), Some(" hi "));
        assert_eq!(d.attributes.len(), 1);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(ElementDescriptor::from_payload(&json!(null)).is_err());
        assert!(ElementDescriptor::from_payload(&json!("DIV")).is_err());
        assert!(ElementDescriptor::from_payload(&json!({ "xpath": "/html" })).is_err());
        assert!(ElementDescriptor::from_payload(&json!({ "tagName": "  " })).is_err());
    }

    #[test]
    fn suggestion_follows_tag() {
        assert_eq!(ActionKind::suggested_for("SELECT"), Some(ActionKind::Select));
        assert_eq!(ActionKind::suggested_for("textarea"), Some(ActionKind::Type));
        assert_eq!(ActionKind::suggested_for("A"), Some(ActionKind::Click));
        assert_eq!(ActionKind::suggested_for("SECTION"), None);
    }

    #[test]
    fn task_ids_are_eight_hex_chars() {
        let id = new_task_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
