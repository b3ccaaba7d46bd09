//! Compound utterances ("turn on the lights and then play music") are split
//! into sub-utterances and sent to the NLU one at a time, per session.

use crate::bus::MessageBus;
use crate::error::{HandlerError, HandlerResult};
use crate::event::{Event, EventKind};
use crate::language::LanguageManager;
use crate::protected::ProtectedIntents;
use crate::registry::Component;
use crate::session::SessionStore;
use crate::topics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Internal marker every separator is rewritten to before splitting.
pub const GLUE_SPLITTER: &str = "__multi_intent__";

/// Decomposition in progress for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiIntent {
    pub session_id: String,
    pub original_string: String,
    pub processed_string: String,
    pub intents: VecDeque<String>,
}

/// Split `input` on any separator. `None` when no separator occurs.
///
/// Pieces keep their surrounding spaces; pieces that are blank are dropped.
pub fn decompose(input: &str, separators: &[String]) -> Option<(String, VecDeque<String>)> {
    let lowered = input.to_lowercase();
    let mut processed = lowered.clone();
    for separator in separators {
        let separator = separator.to_lowercase();
        if separator.trim().is_empty() {
            continue;
        }
        processed = processed.replace(separator.as_str(), GLUE_SPLITTER);
    }
    if processed == lowered {
        return None;
    }
    let intents: VecDeque<String> = processed
        .split(GLUE_SPLITTER)
        .filter(|piece| !piece.trim().is_empty())
        .map(str::to_string)
        .collect();
    if intents.is_empty() {
        return None;
    }
    Some((processed, intents))
}

pub struct MultiIntentManager {
    active: DashMap<String, MultiIntent>,
    store: Arc<SessionStore>,
    bus: Arc<dyn MessageBus>,
    language: Arc<LanguageManager>,
    protected: Arc<ProtectedIntents>,
    default_filter: Vec<String>,
}

impl MultiIntentManager {
    pub const NAME: &'static str = "MultiIntentManager";

    pub fn new(
        store: Arc<SessionStore>,
        bus: Arc<dyn MessageBus>,
        language: Arc<LanguageManager>,
        protected: Arc<ProtectedIntents>,
        default_filter: Vec<String>,
    ) -> Self {
        Self {
            active: DashMap::new(),
            store,
            bus,
            language,
            protected,
            default_filter,
        }
    }

    pub fn is_processing(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<MultiIntent> {
        self.active.get(session_id).map(|e| e.value().clone())
    }

    /// Start decomposing `input` and submit the first piece.
    ///
    /// Returns false, leaving any queue untouched, when the session is already
    /// decomposing or the input holds no separator.
    pub fn process_input(&self, session_id: &str, input: &str) -> bool {
        let Some((processed, intents)) = decompose(input, self.language.separators()) else {
            return false;
        };
        match self.active.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(session_id, "Decomposition already in progress, input not processed");
                return false;
            }
            Entry::Vacant(slot) => {
                info!(session_id, pieces = intents.len(), "🔀 Multi-intent detected");
                slot.insert(MultiIntent {
                    session_id: session_id.to_string(),
                    original_string: input.to_string(),
                    processed_string: processed,
                    intents,
                });
            }
        }
        self.process_next(session_id);
        true
    }

    /// Submit the next queued piece. When the queue is exhausted or the
    /// session is gone the decomposition is discarded and false is returned.
    pub fn process_next(&self, session_id: &str) -> bool {
        let Some(session) = self.store.get(session_id) else {
            self.remove(session_id);
            return false;
        };
        let next = self
            .active
            .get_mut(session_id)
            .and_then(|mut e| e.intents.pop_front());
        let Some(input) = next else {
            self.remove(session_id);
            return false;
        };

        let filter = self
            .protected
            .scoped_filter(session.intent_filter(), &self.default_filter);
        debug!(session_id, input = %input, "Submitting sub-utterance");
        self.bus.publish(
            topics::NLU_QUERY,
            json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "sessionId": session_id,
                "input": input,
                "intentFilter": filter,
            }),
        );
        true
    }

    /// Drop a session's queue. Remaining pieces are discarded silently.
    pub fn remove(&self, session_id: &str) -> Option<MultiIntent> {
        self.active.remove(session_id).map(|(_, m)| m)
    }
}

impl Component for MultiIntentManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::IntentParsed,
            EventKind::IntentNotRecognized,
            EventKind::SessionEnded,
            EventKind::SessionError,
        ]
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        let session_id = event
            .session_id()
            .ok_or_else(|| HandlerError::MissingArgument("sessionId".to_string()))?;
        match event.kind {
            EventKind::IntentParsed | EventKind::IntentNotRecognized => {
                if self.is_processing(&session_id) {
                    self.process_next(&session_id);
                }
            }
            EventKind::SessionEnded | EventKind::SessionError => {
                self.remove(&session_id);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separators() -> Vec<String> {
        vec!["and then".to_string()]
    }

    #[test]
    fn decompose_keeps_spacing() {
        let (processed, intents) =
            decompose("Turn on the lights AND THEN play music", &separators()).unwrap();
        assert_eq!(processed, "turn on the lights __multi_intent__ play music");
        assert_eq!(
            intents,
            VecDeque::from(vec!["turn on the lights ".to_string(), " play music".to_string()])
        );
    }

    #[test]
    fn decompose_without_separator_is_none() {
        assert!(decompose("play music", &separators()).is_none());
        assert!(decompose("and then", &separators()).is_none());
    }

    #[test]
    fn decompose_drops_blank_pieces() {
        let (_, intents) = decompose("and then play music and then", &separators()).unwrap();
        assert_eq!(intents, VecDeque::from(vec![" play music ".to_string()]));
    }
}
