//! Session owner. Runs first in every dispatch pass and applies the session
//! state transitions before any other component sees the event.

use crate::config::DialogConfig;
use crate::dispatcher::{Dispatcher, SESSION_OWNER};
use crate::error::{DialogError, DialogResult, HandlerError, HandlerResult};
use crate::event::{Broadcast, Event, EventKind};
use crate::language::LanguageManager;
use crate::message::InboundMessage;
use crate::multi_intent::MultiIntentManager;
use crate::protected::ProtectedIntents;
use crate::registry::Component;
use crate::session::{DialogSession, SessionState, SessionStore};
use crate::timer::Timer;
use crate::topics;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

const TTS_SAY: &str = "hermes/tts/say";

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

pub struct DialogManager {
    store: Arc<SessionStore>,
    dispatcher: Arc<Dispatcher>,
    multi_intent: Arc<MultiIntentManager>,
    language: Arc<LanguageManager>,
    protected: Arc<ProtectedIntents>,
    config: Arc<DialogConfig>,
    timeouts: DashMap<String, Timer>,
    me: Weak<DialogManager>,
}

impl DialogManager {
    pub fn new(
        store: Arc<SessionStore>,
        dispatcher: Arc<Dispatcher>,
        multi_intent: Arc<MultiIntentManager>,
        language: Arc<LanguageManager>,
        protected: Arc<ProtectedIntents>,
        config: Arc<DialogConfig>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            dispatcher,
            multi_intent,
            language,
            protected,
            config,
            timeouts: DashMap::new(),
            me: me.clone(),
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn has_timeout(&self, session_id: &str) -> bool {
        self.timeouts.contains_key(session_id)
    }

    /// (Re)arm the idle timeout of a session.
    fn start_timeout(&self, session_id: &str) -> DialogResult<()> {
        let me = self.me.clone();
        let id = session_id.to_string();
        let timer = Timer::start(
            format!("session_{session_id}"),
            self.config.session_timeout(),
            move || {
                if let Some(manager) = me.upgrade() {
                    manager.on_session_timeout(&id);
                }
            },
        )?;
        // The replaced timer is cancelled on drop.
        self.timeouts.insert(session_id.to_string(), timer);
        Ok(())
    }

    fn cancel_timeout(&self, session_id: &str) {
        if let Some((_, timer)) = self.timeouts.remove(session_id) {
            timer.cancel();
        }
    }

    fn on_session_timeout(&self, session_id: &str) {
        let Some(session) = self.store.get(session_id) else {
            return;
        };
        // Activity re-armed the timeout while this one was firing.
        let rearmed = self
            .timeouts
            .get(session_id)
            .is_some_and(|t| !t.has_fired());
        if rearmed {
            return;
        }
        self.timeouts.remove(session_id);
        info!(session_id, "⏱️ Session timed out");
        let report = self.dispatcher.broadcast(
            Broadcast::new(EventKind::SessionTimeout)
                .excluding(SESSION_OWNER)
                .arg("sessionId", session.session_id())
                .arg("siteId", session.site_id())
                .arg("session", session.clone()),
        );
        if let Err(e) = report {
            warn!(session_id, error = %e, "Timeout broadcast failed");
        }
        if let Err(e) = self.end_session(session_id, "timeout", false) {
            warn!(session_id, error = %e, "Could not end timed out session");
        }
    }

    /// Create a session for `site_id`, announce it and, unless it is a
    /// notification, start listening.
    pub fn start_session(
        &self,
        site_id: &str,
        message: Option<&InboundMessage>,
    ) -> DialogResult<DialogSession> {
        let session = self.store.create(site_id, message);
        let id = session.session_id().to_string();
        self.store.transition(&id, SessionState::Starting)?;

        let init = message.and_then(|m| m.payload.get("init")).cloned();
        if let Some(filter) = string_list(init.as_ref().and_then(|i| i.get("intentFilter"))) {
            self.store.set_intent_filter(&id, filter)?;
        }
        self.store.transition(&id, SessionState::Started)?;

        self.dispatcher.publish(
            topics::SESSION_STARTED,
            json!({
                "siteId": site_id,
                "sessionId": id,
                "customData": Value::Object(session.custom_data().clone()),
            }),
        );
        self.start_timeout(&id)?;

        let snapshot = self
            .store
            .get(&id)
            .ok_or_else(|| DialogError::SessionNotFound(id.clone()))?;
        self.dispatcher.broadcast(
            Broadcast::new(EventKind::SessionStarted)
                .excluding(SESSION_OWNER)
                .arg("sessionId", id.as_str())
                .arg("siteId", site_id)
                .arg("session", snapshot.clone()),
        )?;

        let is_notification = init
            .as_ref()
            .and_then(|i| i.get("type"))
            .and_then(Value::as_str)
            == Some("notification");
        if let Some(text) = init
            .as_ref()
            .and_then(|i| i.get("text"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            self.say(&snapshot, text);
        }
        if !is_notification {
            self.listen(&id)?;
        }
        Ok(snapshot)
    }

    fn say(&self, session: &DialogSession, text: &str) {
        self.dispatcher.publish(
            TTS_SAY,
            json!({
                "text": text,
                "lang": self.language.active_language(),
                "siteId": session.site_id(),
                "sessionId": session.session_id(),
            }),
        );
    }

    /// Put the session in listening mode and tell the recognizer.
    fn listen(&self, session_id: &str) -> DialogResult<()> {
        self.store.transition(session_id, SessionState::Listening)?;
        self.start_timeout(session_id)?;
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| DialogError::SessionNotFound(session_id.to_string()))?;
        self.dispatcher.publish(
            topics::START_LISTENING,
            json!({"siteId": session.site_id(), "sessionId": session_id}),
        );
        self.dispatcher.broadcast(
            Broadcast::new(EventKind::StartListening)
                .excluding(SESSION_OWNER)
                .arg("sessionId", session_id)
                .arg("siteId", session.site_id())
                .arg("session", session.clone()),
        )?;
        Ok(())
    }

    /// End a session: announce `sessionEnded`, remove it and notify the fan-out.
    pub fn end_session(&self, session_id: &str, reason: &str, revive: bool) -> DialogResult<()> {
        self.store.transition(session_id, SessionState::Ending)?;
        self.cancel_timeout(session_id);

        let Some(session) = self.store.remove(session_id) else {
            return Ok(());
        };
        self.dispatcher.publish(
            topics::SESSION_ENDED,
            json!({
                "siteId": session.site_id(),
                "sessionId": session_id,
                "customData": Value::Object(session.custom_data().clone()),
                "termination": {"reason": reason},
            }),
        );
        info!(session_id, reason, "👋 Session ended");
        if revive {
            self.store.plan_revival(session.site_id(), session_id);
        }

        self.dispatcher.broadcast(
            Broadcast::new(EventKind::SessionEnded)
                .excluding(SESSION_OWNER)
                .arg("sessionId", session_id)
                .arg("siteId", session.site_id())
                .arg("reason", reason)
                .arg("session", session.clone()),
        )?;
        Ok(())
    }

    fn require_session_id(event: &Event) -> Result<String, HandlerError> {
        event
            .session_id()
            .ok_or_else(|| HandlerError::MissingArgument("sessionId".to_string()))
    }

    fn require_site_id(event: &Event) -> Result<String, HandlerError> {
        event
            .site_id()
            .ok_or_else(|| HandlerError::MissingArgument("siteId".to_string()))
    }

    fn on_hotword(&self, event: &Event) -> HandlerResult {
        let site_id = Self::require_site_id(event)?;
        if self.store.get_by_site(&site_id).is_some() {
            debug!(site_id = %site_id, "Hotword ignored, device busy");
            return Ok(());
        }
        if let Ok(message) = event.message() {
            self.store.pre_session(&site_id, message.clone());
        }
        self.start_session(&site_id, None)?;
        Ok(())
    }

    fn on_start_session(&self, event: &Event) -> HandlerResult {
        let site_id = Self::require_site_id(event)?;
        if let Some(active) = self.store.get_by_site(&site_id) {
            return Err(HandlerError::Failed(format!(
                "device {site_id} busy with session {}",
                active.session_id()
            )));
        }
        self.start_session(&site_id, event.message().ok())?;
        Ok(())
    }

    fn on_session_started(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        let pending = self
            .store
            .get(&id)
            .is_some_and(|s| matches!(s.state(), SessionState::Created | SessionState::Starting));
        if pending {
            self.store.transition(&id, SessionState::Started)?;
            self.start_timeout(&id)?;
        }
        Ok(())
    }

    fn on_start_listening(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        self.store.transition(&id, SessionState::Listening)?;
        self.start_timeout(&id)?;
        Ok(())
    }

    fn on_captured(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        let message = match event.message() {
            Ok(m) => m.clone(),
            Err(_) => {
                let text = event.str_arg("text")?;
                InboundMessage::new(
                    topics::TEXT_CAPTURED,
                    json!({"sessionId": id, "text": text}),
                )
            }
        };
        self.store.transition(&id, SessionState::InDialog)?;
        let session = self.store.update(&id, &message)?;
        self.start_timeout(&id)?;

        let text = session.text().trim().to_string();
        if self.language.is_cancel_phrase(&text) {
            info!(session_id = %id, "🚫 Session cancelled by user");
            self.end_session(&id, "abortedByUser", false)?;
            return Ok(());
        }

        if self.multi_intent.process_input(&id, &text) {
            return Ok(());
        }

        let filter = self
            .protected
            .scoped_filter(session.intent_filter(), &self.config.default_intent_filter);
        self.dispatcher.publish(
            topics::NLU_QUERY,
            json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "input": text,
                "intentFilter": filter,
                "sessionId": id,
            }),
        );
        Ok(())
    }

    fn on_intent_parsed(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        let message = event.message()?;
        let session = self.store.update(&id, message)?;
        self.store.reset_not_understood(&id)?;
        self.store.transition(&id, SessionState::InDialog)?;
        self.start_timeout(&id)?;

        let intent = session.intent_name();
        match self.dispatcher.skills().dispatch_intent(intent, &session) {
            Some(skill) => info!(session_id = %id, intent, skill = %skill, "🎯 Intent handled"),
            None => debug!(session_id = %id, intent, "Intent not consumed by any skill"),
        }
        Ok(())
    }

    /// Re-prompt by ending the session and reviving its context in a fresh
    /// one, until the retry budget is spent.
    fn on_intent_not_recognized(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        if !self.store.contains(&id) {
            return Ok(());
        }
        let count = self.store.increment_not_understood(&id)?;
        let Some(session) = self.store.get(&id) else {
            return Ok(());
        };

        if count <= self.config.not_understood_retries {
            info!(session_id = %id, attempt = count, "🤔 Not understood, retrying");
            self.end_session(&id, "intentNotRecognized", true)?;
            self.start_session(session.site_id(), None)?;
        } else {
            info!(session_id = %id, "Not understood too many times, giving up");
            self.end_session(&id, "intentNotRecognized", false)?;
        }
        Ok(())
    }

    fn on_continue_session(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        let message = event.message()?;
        let session = self.store.update(&id, message)?;
        if let Some(filter) = string_list(message.payload.get("intentFilter")) {
            self.store.set_intent_filter(&id, filter)?;
        }
        self.store.transition(&id, SessionState::InDialog)?;
        if let Some(text) = message.text().filter(|t| !t.is_empty()) {
            self.say(&session, &text);
        }
        self.listen(&id)?;
        Ok(())
    }

    fn on_end_session(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        if let Ok(message) = event.message() {
            if let (Some(text), Some(session)) = (message.text(), self.store.get(&id)) {
                if !text.is_empty() {
                    self.say(&session, &text);
                }
            }
        }
        self.end_session(&id, "nominal", false)?;
        Ok(())
    }

    /// Ended elsewhere; just forget it.
    fn on_session_gone(&self, event: &Event) -> HandlerResult {
        let id = Self::require_session_id(event)?;
        self.cancel_timeout(&id);
        if event.kind == EventKind::SessionError {
            if let Some(session) = self.store.get(&id) {
                self.dispatcher.publish(
                    topics::PLAY_SOUND,
                    json!({"siteId": session.site_id(), "sessionId": id, "sound": "error"}),
                );
            }
        }
        self.store.remove(&id);
        Ok(())
    }
}

impl Component for DialogManager {
    fn name(&self) -> &str {
        SESSION_OWNER
    }

    fn subscriptions(&self) -> Vec<EventKind> {
        vec![
            EventKind::HotwordDetected,
            EventKind::StartSession,
            EventKind::SessionStarted,
            EventKind::StartListening,
            EventKind::Captured,
            EventKind::IntentParsed,
            EventKind::IntentNotRecognized,
            EventKind::ContinueSession,
            EventKind::EndSession,
            EventKind::SessionEnded,
            EventKind::SessionError,
        ]
    }

    fn handle(&self, event: &Event) -> HandlerResult {
        match event.kind {
            EventKind::HotwordDetected => self.on_hotword(event),
            EventKind::StartSession => self.on_start_session(event),
            EventKind::SessionStarted => self.on_session_started(event),
            EventKind::StartListening => self.on_start_listening(event),
            EventKind::Captured => self.on_captured(event),
            EventKind::IntentParsed => self.on_intent_parsed(event),
            EventKind::IntentNotRecognized => self.on_intent_not_recognized(event),
            EventKind::ContinueSession => self.on_continue_session(event),
            EventKind::EndSession => self.on_end_session(event),
            EventKind::SessionEnded | EventKind::SessionError => self.on_session_gone(event),
            _ => Ok(()),
        }
    }

    fn on_stop(&self) {
        for id in self.store.session_ids() {
            self.cancel_timeout(&id);
        }
    }
}
