//! Dialog sessions and their lifecycle state machine.
//!
//! A [`DialogSession`] is only mutated through [`SessionStore`]; everything
//! else works on snapshots.

mod store;

pub use store::SessionStore;

use crate::message::{InboundMessage, Slot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    Starting,
    Started,
    Listening,
    InDialog,
    Ending,
    Ended,
    Revived,
}

impl SessionState {
    /// Allowed edges. Listening and InDialog alternate freely while the dialog
    /// continues; Ending may fall back to InDialog when an end is cancelled.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Starting | Started | Ending | Ended)
                | (Starting, Started | Ending | Ended)
                | (Started, Listening | InDialog | Ending | Ended)
                | (Listening | InDialog, Listening | InDialog | Ending | Ended)
                | (Ending, Ended | InDialog)
                | (Ended, Revived)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Revived)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "CREATED",
            SessionState::Starting => "STARTING",
            SessionState::Started => "STARTED",
            SessionState::Listening => "LISTENING",
            SessionState::InDialog => "IN_DIALOG",
            SessionState::Ending => "ENDING",
            SessionState::Ended => "ENDED",
            SessionState::Revived => "REVIVED",
        };
        f.write_str(s)
    }
}

/// One conversation turn-sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSession {
    pub(crate) session_id: String,
    pub(crate) site_id: String,
    pub(crate) user: String,
    pub(crate) state: SessionState,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) slots: HashMap<String, String>,
    pub(crate) slots_as_objects: HashMap<String, Vec<Slot>>,
    pub(crate) custom_data: Map<String, Value>,
    pub(crate) payload: Value,
    pub(crate) intent_name: String,
    pub(crate) input: String,
    pub(crate) text: String,
    pub(crate) intent_history: Vec<String>,
    pub(crate) intent_filter: Vec<String>,
    pub(crate) not_understood: u32,
    #[serde(skip)]
    pub(crate) last_message: Option<InboundMessage>,
}

impl DialogSession {
    pub(crate) fn new(site_id: impl Into<String>) -> Self {
        Self {
            session_id: String::new(),
            site_id: site_id.into(),
            user: "unknown".to_string(),
            state: SessionState::Created,
            created_at: Utc::now(),
            slots: HashMap::new(),
            slots_as_objects: HashMap::new(),
            custom_data: Map::new(),
            payload: Value::Null,
            intent_name: String::new(),
            input: String::new(),
            text: String::new(),
            intent_history: Vec::new(),
            intent_filter: Vec::new(),
            not_understood: 0,
            last_message: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn slots(&self) -> &HashMap<String, String> {
        &self.slots
    }

    pub fn slots_as_objects(&self) -> &HashMap<String, Vec<Slot>> {
        &self.slots_as_objects
    }

    pub fn custom_data(&self) -> &Map<String, Value> {
        &self.custom_data
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn intent_name(&self) -> &str {
        &self.intent_name
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn intent_history(&self) -> &[String] {
        &self.intent_history
    }

    pub fn intent_filter(&self) -> &[String] {
        &self.intent_filter
    }

    pub fn not_understood(&self) -> u32 {
        self.not_understood
    }

    pub fn last_message(&self) -> Option<&InboundMessage> {
        self.last_message.as_ref()
    }

    /// Last resolved intent, if any.
    pub fn previous_intent(&self) -> Option<&str> {
        self.intent_history.last().map(String::as_str)
    }

    /// Structured value of the first occurrence of `name`.
    pub fn slot_value(&self, name: &str) -> Option<&Value> {
        self.slots_as_objects
            .get(name)
            .and_then(|v| v.first())
            .map(|s| &s.value)
    }

    pub fn slot_raw_value(&self, name: &str) -> Option<&str> {
        self.slots.get(name).map(String::as_str)
    }

    /// Attach a message. The id is only taken when none is set yet.
    pub(crate) fn extend(&mut self, message: &InboundMessage, session_id: Option<&str>) {
        if self.session_id.is_empty() {
            if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                self.session_id = id.to_string();
            }
        }
        self.update(message);
    }

    /// Merge slots and custom data, replace the payload.
    pub(crate) fn update(&mut self, message: &InboundMessage) {
        // The intent being superseded is what goes into history.
        if message.is_intent() && !self.intent_name.is_empty() {
            let previous = std::mem::take(&mut self.intent_name);
            self.add_to_history(previous);
        }

        self.slots.extend(message.slots());
        self.slots_as_objects.extend(message.slots_as_objects());
        self.custom_data.extend(message.custom_data());
        self.payload = message.payload.clone();

        if message.is_intent() {
            if let Some(name) = message.intent_name() {
                self.intent_name = name;
            }
        }
        if let Some(input) = message.input() {
            self.input = input;
        }
        if let Some(text) = message.text() {
            self.text = text;
        }
        if let Some(site) = message.site_id() {
            self.site_id = site;
        }
        self.last_message = Some(message.clone());
    }

    pub(crate) fn add_to_history(&mut self, intent: impl Into<String>) {
        self.intent_history.push(intent.into());
    }

    /// Carry the mutable context of a terminated session into this one.
    pub(crate) fn revive_old_session(&mut self, prior: &DialogSession) {
        self.payload = prior.payload.clone();
        self.slots = prior.slots.clone();
        self.slots_as_objects = prior.slots_as_objects.clone();
        self.custom_data = prior.custom_data.clone();
        self.user = prior.user.clone();
        self.last_message = prior.last_message.clone();
        self.intent_history = prior.intent_history.clone();
        self.intent_filter = prior.intent_filter.clone();
        self.not_understood = prior.not_understood;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transitions_follow_lifecycle() {
        use SessionState::*;
        assert!(Created.can_transition_to(Starting));
        assert!(Started.can_transition_to(Listening));
        assert!(Listening.can_transition_to(InDialog));
        assert!(InDialog.can_transition_to(Listening));
        assert!(Ending.can_transition_to(Ended));
        assert!(Ended.can_transition_to(Revived));
        assert!(!Ended.can_transition_to(Listening));
        assert!(!Revived.can_transition_to(Started));
        assert!(!Listening.can_transition_to(Created));
    }

    #[test]
    fn history_is_append_only() {
        let mut session = DialogSession::new("kitchen");
        assert!(session.previous_intent().is_none());
        for i in 0..5 {
            session.add_to_history(format!("intent{i}"));
        }
        assert_eq!(session.intent_history().len(), 5);
        assert_eq!(session.previous_intent(), Some("intent4"));
        assert_eq!(session.intent_history()[0], "intent0");
    }

    #[test]
    fn update_merges_slots_and_replaces_payload() {
        let mut session = DialogSession::new("kitchen");
        session.extend(
            &InboundMessage::new(
                "hermes/intent/A",
                json!({"slots": [{"slotName": "Room", "rawValue": "kitchen"}], "customData": {"a": 1}}),
            ),
            Some("s1"),
        );
        session.update(&InboundMessage::new(
            "hermes/intent/B",
            json!({"slots": [{"slotName": "Color", "rawValue": "red"}], "customData": {"b": 2}}),
        ));

        assert_eq!(session.session_id(), "s1");
        assert_eq!(session.slot_raw_value("Room"), Some("kitchen"));
        assert_eq!(session.slot_raw_value("Color"), Some("red"));
        assert_eq!(session.custom_data().len(), 2);
        assert!(session.payload().get("customData").and_then(|c| c.get("a")).is_none());
        assert_eq!(session.intent_name(), "B");
        assert_eq!(session.previous_intent(), Some("A"));
    }

    #[test]
    fn extend_keeps_existing_id() {
        let mut session = DialogSession::new("den");
        session.extend(&InboundMessage::new("x", json!({})), Some("first"));
        session.extend(&InboundMessage::new("x", json!({})), Some("second"));
        assert_eq!(session.session_id(), "first");
    }

    #[test]
    fn revive_copies_context() {
        let mut prior = DialogSession::new("den");
        prior.add_to_history("Weather:Ask");
        prior.intent_filter = vec!["Weather:Ask".to_string()];
        prior.not_understood = 2;
        prior.user = "alice".to_string();

        let mut fresh = DialogSession::new("den");
        fresh.revive_old_session(&prior);
        assert_eq!(fresh.user(), "alice");
        assert_eq!(fresh.not_understood(), 2);
        assert_eq!(fresh.previous_intent(), Some("Weather:Ask"));
        assert_eq!(fresh.intent_filter(), prior.intent_filter());
    }
}
