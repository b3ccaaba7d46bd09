//! Inbound bus messages and the fields the dialog layer parses out of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One structured slot value as produced by the NLU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub slot_name: String,
    #[serde(default)]
    pub raw_value: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default)]
    pub value: Value,
}

/// A message received from the bus: topic plus JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    fn str_field(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn session_id(&self) -> Option<String> {
        self.str_field("sessionId").filter(|s| !s.is_empty())
    }

    /// Origin device. Older clients send `deviceUid` instead of `siteId`.
    pub fn site_id(&self) -> Option<String> {
        self.str_field("siteId")
            .or_else(|| self.str_field("deviceUid"))
            .filter(|s| !s.is_empty())
    }

    pub fn input(&self) -> Option<String> {
        self.str_field("input")
    }

    pub fn text(&self) -> Option<String> {
        self.str_field("text")
    }

    /// True for NLU results (`hermes/intent/<name>`).
    pub fn is_intent(&self) -> bool {
        self.topic.starts_with("hermes/intent/")
    }

    /// Intent name from the payload, falling back to the topic suffix.
    pub fn intent_name(&self) -> Option<String> {
        self.payload
            .get("intent")
            .and_then(|i| i.get("intentName"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                self.topic
                    .strip_prefix("hermes/intent/")
                    .map(str::to_string)
            })
    }

    pub fn slots_as_objects(&self) -> HashMap<String, Vec<Slot>> {
        let mut out: HashMap<String, Vec<Slot>> = HashMap::new();
        let Some(slots) = self.payload.get("slots").and_then(Value::as_array) else {
            return out;
        };
        for raw in slots {
            match serde_json::from_value::<Slot>(raw.clone()) {
                Ok(slot) => out.entry(slot.slot_name.clone()).or_default().push(slot),
                Err(e) => tracing::debug!(error = %e, "Skipping malformed slot"),
            }
        }
        out
    }

    /// Slot name mapped to the raw value of its first occurrence.
    pub fn slots(&self) -> HashMap<String, String> {
        self.slots_as_objects()
            .into_iter()
            .filter_map(|(name, values)| values.first().map(|s| (name, s.raw_value.clone())))
            .collect()
    }

    /// `customData` may arrive as an object or as a JSON-encoded string.
    pub fn custom_data(&self) -> Map<String, Value> {
        match self.payload.get("customData") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}
