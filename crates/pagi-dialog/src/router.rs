//! Turns inbound bus messages into dispatch passes.

use crate::asr::AudioFrame;
use crate::dispatcher::{DispatchReport, Dispatcher, HOST_NAME};
use crate::error::DialogResult;
use crate::event::{Broadcast, EventArg, EventKind};
use crate::message::InboundMessage;
use crate::session::SessionStore;
use crate::topics;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Event kind for an inbound topic, if the host reacts to it.
pub fn event_for_topic(topic: &str) -> Option<EventKind> {
    let kind = match topic {
        topics::START_SESSION => EventKind::StartSession,
        topics::CONTINUE_SESSION => EventKind::ContinueSession,
        topics::END_SESSION => EventKind::EndSession,
        topics::SESSION_STARTED => EventKind::SessionStarted,
        topics::SESSION_ENDED => EventKind::SessionEnded,
        topics::START_LISTENING => EventKind::StartListening,
        topics::STOP_LISTENING => EventKind::StopListening,
        topics::TEXT_CAPTURED => EventKind::Captured,
        topics::INTENT_NOT_RECOGNIZED => EventKind::IntentNotRecognized,
        topics::NLU_ERROR => EventKind::SessionError,
        topics::VAD_UP => EventKind::VadUp,
        topics::VAD_DOWN => EventKind::VadDown,
        t if topics::is_hotword(t) => EventKind::HotwordDetected,
        t if topics::is_audio_frame(t) => EventKind::AudioFrame,
        t if t.starts_with(topics::INTENT_PREFIX) => EventKind::IntentParsed,
        _ => return None,
    };
    Some(kind)
}

/// `{samples, sampleRate}` payload of an audio server frame. Rate defaults to 16 kHz.
pub fn audio_frame(payload: &Value) -> Option<AudioFrame> {
    let samples = payload
        .get("samples")?
        .as_array()?
        .iter()
        .filter_map(Value::as_f64)
        .map(|s| s as f32)
        .collect();
    let sample_rate = payload
        .get("sampleRate")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok())
        .unwrap_or(16000);
    Some(AudioFrame::new(samples, sample_rate))
}

pub struct InboundRouter {
    dispatcher: Arc<Dispatcher>,
    store: Arc<SessionStore>,
}

impl InboundRouter {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Arc<SessionStore>) -> Self {
        Self { dispatcher, store }
    }

    /// Dispatch one inbound message. `None` for topics the host ignores.
    pub fn route(&self, message: InboundMessage) -> DialogResult<Option<DispatchReport>> {
        let Some(kind) = event_for_topic(&message.topic) else {
            debug!(topic = %message.topic, "Unhandled topic");
            return Ok(None);
        };

        let mut broadcast = Broadcast::new(kind.clone()).excluding(HOST_NAME);

        let site_id = message
            .site_id()
            .or_else(|| topics::audio_frame_site(&message.topic).map(str::to_string));
        if let Some(site_id) = &site_id {
            broadcast = broadcast.arg("siteId", site_id.as_str());
        }
        if let Some(session_id) = message.session_id() {
            if let Some(session) = self.store.get(&session_id) {
                broadcast = broadcast.arg("session", session);
            }
            broadcast = broadcast.arg("sessionId", session_id);
        } else if kind == EventKind::StopListening || kind == EventKind::VadUp || kind == EventKind::VadDown {
            // Device-level signals may omit the session.
            if let Some(session) = site_id.as_deref().and_then(|s| self.store.get_by_site(s)) {
                broadcast = broadcast
                    .arg("sessionId", session.session_id())
                    .arg("session", session);
            }
        }

        match kind {
            EventKind::AudioFrame => {
                let Some(frame) = audio_frame(&message.payload) else {
                    debug!(topic = %message.topic, "Audio frame without samples");
                    return Ok(None);
                };
                broadcast = broadcast.arg("frame", EventArg::opaque(frame));
            }
            EventKind::Captured => {
                if let Some(text) = message.text() {
                    broadcast = broadcast.arg("text", text);
                }
                broadcast = broadcast.arg("message", message);
            }
            _ => broadcast = broadcast.arg("message", message),
        }

        self.dispatcher.broadcast(broadcast).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_map_to_events() {
        assert_eq!(event_for_topic("hermes/hotword/hey_pagi/detected"), Some(EventKind::HotwordDetected));
        assert_eq!(event_for_topic("hermes/intent/Weather:Ask"), Some(EventKind::IntentParsed));
        assert_eq!(event_for_topic("hermes/audioServer/den/audioFrame"), Some(EventKind::AudioFrame));
        assert_eq!(event_for_topic(topics::NLU_ERROR), Some(EventKind::SessionError));
        assert_eq!(event_for_topic(topics::PLAY_SOUND), None);
        assert_eq!(event_for_topic("hermes/tts/say"), None);
    }

    #[test]
    fn audio_frames_parse_samples() {
        let frame = audio_frame(&serde_json::json!({"samples": [0.0, 0.5], "sampleRate": 8000})).unwrap();
        assert_eq!(frame.samples, vec![0.0, 0.5]);
        assert_eq!(frame.sample_rate, 8000);
        assert!(audio_frame(&serde_json::json!({})).is_none());
    }
}
