//! Page snapshots
//!
//! Immutable, point-in-time view of the browser: URL, title, visible text,
//! interactive elements and forms. Also parses the accessibility tree JSON
//! printed by `agent-browser snapshot -i --json`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Action, ActionKind};

/// Structured representation of the current browser state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Visible plain text
    pub text: String,
    /// Interactive elements in document order
    pub elements: Vec<InteractiveElement>,
    pub forms: Vec<FormSnapshot>,
    pub captured_at: DateTime<Utc>,
}

/// An element the model may target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// Stable identifier within this snapshot (e.g. `e12`)
    pub id: String,
    /// ARIA role
    pub role: String,
    /// Visible label / accessible name
    pub label: String,
    /// Surrounding text, when the driver provides it
    #[serde(default)]
    pub context: String,
    /// Current value (for inputs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

/// Bounding box in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A form and the elements that belong to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    /// Element ids of the form's fields
    pub fields: Vec<String>,
}

impl PageSnapshot {
    /// Create an empty snapshot for a URL
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            text: String::new(),
            elements: Vec::new(),
            forms: Vec::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_element(mut self, element: InteractiveElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Get an element by id, tolerating a leading `@`
    pub fn get_element(&self, id: &str) -> Option<&InteractiveElement> {
        let clean = id.strip_prefix('@').unwrap_or(id);
        self.elements.iter().find(|el| el.id == clean)
    }

    /// Check that an action is structurally valid against this snapshot.
    ///
    /// Returns the reason when it is not.
    pub fn check_action(&self, action: &Action) -> std::result::Result<(), String> {
        if !(0.0..=1.0).contains(&action.confidence) {
            return Err(format!("confidence {} outside [0, 1]", action.confidence));
        }

        match &action.target {
            Some(target) => {
                if self.get_element(target).is_none() {
                    return Err(format!("target '{}' not present on the page", target));
                }
            }
            None if action.kind.needs_target() => {
                return Err(format!("{} requires a target element", action.kind));
            }
            None => {}
        }

        let required = match action.kind {
            ActionKind::Navigate => Some("url"),
            ActionKind::Type => Some("text"),
            ActionKind::Select => Some("value"),
            _ => None,
        };
        if let Some(key) = required {
            if action.get_string(key).is_none() {
                return Err(format!("{} requires parameter '{}'", action.kind, key));
            }
        }
        if action.kind == ActionKind::Wait && action.get_u64("duration_ms").is_none() {
            return Err("wait requires parameter 'duration_ms'".to_string());
        }

        Ok(())
    }

    /// Build a snapshot from `agent-browser snapshot -i --json` output
    pub fn from_agent_browser(
        json: &str,
        url: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> serde_json::Result<Self> {
        let raw: RawSnapshot = serde_json::from_str(json)?;
        let data = raw.data.unwrap_or_default();

        let mut refs: Vec<(String, RawElement)> = data.refs.into_iter().collect();
        refs.sort_by_key(|(id, _)| ref_order(id));

        let mut elements = Vec::new();
        let mut forms = Vec::new();
        for (id, el) in refs {
            if el.role == "form" {
                forms.push(FormSnapshot {
                    id: Some(id),
                    name: el.name,
                    fields: Vec::new(),
                });
                continue;
            }
            if !el.is_interactive() {
                continue;
            }
            let bounds = el.bounds();
            elements.push(InteractiveElement {
                id,
                role: el.role,
                label: el.name,
                context: String::new(),
                value: el.value,
                bounds,
            });
        }

        Ok(Self {
            url: url.into(),
            title: title.into(),
            text: text.into(),
            elements,
            forms,
            captured_at: Utc::now(),
        })
    }
}

impl InteractiveElement {
    pub fn new(id: impl Into<String>, role: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            label: label.into(),
            context: String::new(),
            value: None,
            bounds: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Check if this is an input element
    pub fn is_input(&self) -> bool {
        matches!(
            self.role.as_str(),
            "textbox" | "searchbox" | "combobox" | "spinbutton"
        )
    }

    /// Check if this is clickable
    pub fn is_clickable(&self) -> bool {
        matches!(
            self.role.as_str(),
            "button" | "link" | "menuitem" | "tab" | "checkbox" | "radio" | "switch"
        )
    }
}

/// Numeric part of an `eN` ref, so that refs sort in document order
fn ref_order(id: &str) -> (u64, String) {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.parse().unwrap_or(u64::MAX), id.to_string())
}

/// Envelope printed by agent-browser
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    data: Option<RawSnapshotData>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSnapshotData {
    #[serde(default)]
    refs: HashMap<String, RawElement>,
}

#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(default)]
    role: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(flatten)]
    properties: HashMap<String, serde_json::Value>,
}

impl RawElement {
    fn is_interactive(&self) -> bool {
        matches!(
            self.role.as_str(),
            "button"
                | "link"
                | "textbox"
                | "checkbox"
                | "radio"
                | "combobox"
                | "menuitem"
                | "tab"
                | "switch"
                | "searchbox"
                | "spinbutton"
                | "option"
        )
    }

    fn bounds(&self) -> Option<Bounds> {
        let b = self.properties.get("box").or_else(|| self.properties.get("bounds"))?;
        Some(Bounds {
            x: b.get("x")?.as_f64()?,
            y: b.get("y")?.as_f64()?,
            width: b.get("width")?.as_f64()?,
            height: b.get("height")?.as_f64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbox() -> PageSnapshot {
        PageSnapshot::new("https://mail.example.com/inbox", "Inbox")
            .with_element(InteractiveElement::new("e1", "button", "Delete"))
            .with_element(InteractiveElement::new("e2", "textbox", "Search mail"))
    }

    #[test]
    fn test_get_element_strips_prefix() {
        let snapshot = inbox();
        assert!(snapshot.get_element("e1").is_some());
        assert!(snapshot.get_element("@e1").is_some());
        assert!(snapshot.get_element("e9").is_none());
    }

    #[test]
    fn test_check_action() {
        let snapshot = inbox();
        assert!(snapshot.check_action(&Action::click("e1")).is_ok());
        assert!(snapshot.check_action(&Action::click("e7")).is_err());
        assert!(snapshot
            .check_action(&Action::new(ActionKind::Type).with_target("e2"))
            .is_err());
        assert!(snapshot
            .check_action(&Action::click("e1").with_confidence(1.5))
            .is_err());
        assert!(snapshot
            .check_action(&Action::navigate("https://example.com"))
            .is_ok());
    }

    #[test]
    fn test_parse_agent_browser_output() {
        let json = r#"{
            "success": true,
            "data": {
                "snapshot": "- button \"Sign in\" [ref=e10]",
                "refs": {
                    "e10": {"role": "button", "name": "Sign in"},
                    "e2": {"role": "textbox", "name": "Email", "value": "a@b.c"},
                    "e3": {"role": "heading", "name": "Welcome"},
                    "e4": {"role": "form", "name": "Login"}
                }
            }
        }"#;
        let snapshot =
            PageSnapshot::from_agent_browser(json, "https://x.test", "X", "Welcome").unwrap();
        let ids: Vec<&str> = snapshot.elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e10"]);
        assert_eq!(snapshot.elements[0].value.as_deref(), Some("a@b.c"));
        assert_eq!(snapshot.forms.len(), 1);
    }
}
