//! Typed events and the arguments they carry through a dispatch pass.

use crate::error::HandlerError;
use crate::message::InboundMessage;
use crate::session::DialogSession;
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Every event the dispatcher knows about. Components subscribe to kinds, not names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Booted,
    HotwordDetected,
    StartSession,
    SessionStarted,
    StartListening,
    StopListening,
    ContinueSession,
    EndSession,
    SessionEnded,
    SessionError,
    SessionTimeout,
    AudioFrame,
    VadUp,
    VadDown,
    PartialTextCaptured,
    Captured,
    IntentParsed,
    IntentNotRecognized,
    InternetConnected,
    InternetLost,
    SkillInstalled,
    ConfigUpdated,
    /// Events defined by skills or add-ons. Holds the camelCase event name.
    Custom(String),
}

const BUILTIN: &[EventKind] = &[
    EventKind::Booted,
    EventKind::HotwordDetected,
    EventKind::StartSession,
    EventKind::SessionStarted,
    EventKind::StartListening,
    EventKind::StopListening,
    EventKind::ContinueSession,
    EventKind::EndSession,
    EventKind::SessionEnded,
    EventKind::SessionError,
    EventKind::SessionTimeout,
    EventKind::AudioFrame,
    EventKind::VadUp,
    EventKind::VadDown,
    EventKind::PartialTextCaptured,
    EventKind::Captured,
    EventKind::IntentParsed,
    EventKind::IntentNotRecognized,
    EventKind::InternetConnected,
    EventKind::InternetLost,
    EventKind::SkillInstalled,
    EventKind::ConfigUpdated,
];

impl EventKind {
    /// camelCase logical name, e.g. `skillInstalled`.
    pub fn event_name(&self) -> &str {
        match self {
            EventKind::Booted => "booted",
            EventKind::HotwordDetected => "hotwordDetected",
            EventKind::StartSession => "startSession",
            EventKind::SessionStarted => "sessionStarted",
            EventKind::StartListening => "startListening",
            EventKind::StopListening => "stopListening",
            EventKind::ContinueSession => "continueSession",
            EventKind::EndSession => "endSession",
            EventKind::SessionEnded => "sessionEnded",
            EventKind::SessionError => "sessionError",
            EventKind::SessionTimeout => "sessionTimeout",
            EventKind::AudioFrame => "audioFrame",
            EventKind::VadUp => "vadUp",
            EventKind::VadDown => "vadDown",
            EventKind::PartialTextCaptured => "partialTextCaptured",
            EventKind::Captured => "captured",
            EventKind::IntentParsed => "intentParsed",
            EventKind::IntentNotRecognized => "intentNotRecognized",
            EventKind::InternetConnected => "internetConnected",
            EventKind::InternetLost => "internetLost",
            EventKind::SkillInstalled => "skillInstalled",
            EventKind::ConfigUpdated => "configUpdated",
            EventKind::Custom(name) => name,
        }
    }

    /// Handler name used as the echo topic, e.g. `onSkillInstalled`.
    pub fn handler_name(&self) -> String {
        handler_name(self.event_name())
    }

    /// Inverse of [`EventKind::event_name`]; unknown names become [`EventKind::Custom`].
    pub fn from_event_name(name: &str) -> Self {
        BUILTIN
            .iter()
            .find(|k| k.event_name() == name)
            .cloned()
            .unwrap_or_else(|| EventKind::Custom(name.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// `"skillInstalled"` -> `"onSkillInstalled"`
pub fn handler_name(event_name: &str) -> String {
    let mut chars = event_name.chars();
    match chars.next() {
        Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
        None => "on".to_string(),
    }
}

/// A named argument handed to every handler.
#[derive(Clone)]
pub enum EventArg {
    Session(DialogSession),
    Message(InboundMessage),
    Value(Value),
    /// In-process only; never echoed on the bus.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl EventArg {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        EventArg::Opaque(Arc::new(value))
    }

    /// Transport-safe form, or `None` when the value cannot be serialized.
    pub fn to_transport(&self) -> Option<Value> {
        match self {
            EventArg::Session(s) => serde_json::to_value(s).ok(),
            EventArg::Message(m) => serde_json::to_value(m).ok(),
            EventArg::Value(v) => Some(v.clone()),
            EventArg::Opaque(_) => None,
        }
    }
}

impl fmt::Debug for EventArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventArg::Session(s) => f.debug_tuple("Session").field(&s.session_id()).finish(),
            EventArg::Message(m) => f.debug_tuple("Message").field(&m.topic).finish(),
            EventArg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            EventArg::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl From<DialogSession> for EventArg {
    fn from(s: DialogSession) -> Self {
        EventArg::Session(s)
    }
}

impl From<InboundMessage> for EventArg {
    fn from(m: InboundMessage) -> Self {
        EventArg::Message(m)
    }
}

impl From<Value> for EventArg {
    fn from(v: Value) -> Self {
        EventArg::Value(v)
    }
}

impl From<&str> for EventArg {
    fn from(s: &str) -> Self {
        EventArg::Value(Value::String(s.to_string()))
    }
}

impl From<String> for EventArg {
    fn from(s: String) -> Self {
        EventArg::Value(Value::String(s))
    }
}

impl From<bool> for EventArg {
    fn from(b: bool) -> Self {
        EventArg::Value(Value::Bool(b))
    }
}

impl From<f64> for EventArg {
    fn from(n: f64) -> Self {
        EventArg::Value(Value::from(n))
    }
}

impl From<u64> for EventArg {
    fn from(n: u64) -> Self {
        EventArg::Value(Value::from(n))
    }
}

/// One logical event with its ordered named arguments.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub args: Vec<(String, EventArg)>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
        }
    }

    pub fn arg(&self, name: &str) -> Option<&EventArg> {
        self.args.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> Result<&EventArg, HandlerError> {
        self.arg(name)
            .ok_or_else(|| HandlerError::MissingArgument(name.to_string()))
    }

    /// The `session` argument.
    pub fn session(&self) -> Result<&DialogSession, HandlerError> {
        match self.require("session")? {
            EventArg::Session(s) => Ok(s),
            _ => Err(HandlerError::WrongArgumentType {
                name: "session".to_string(),
                expected: "session",
            }),
        }
    }

    /// The `message` argument.
    pub fn message(&self) -> Result<&InboundMessage, HandlerError> {
        match self.require("message")? {
            EventArg::Message(m) => Ok(m),
            _ => Err(HandlerError::WrongArgumentType {
                name: "message".to_string(),
                expected: "message",
            }),
        }
    }

    pub fn value(&self, name: &str) -> Result<&Value, HandlerError> {
        match self.require(name)? {
            EventArg::Value(v) => Ok(v),
            _ => Err(HandlerError::WrongArgumentType {
                name: name.to_string(),
                expected: "value",
            }),
        }
    }

    pub fn str_arg(&self, name: &str) -> Result<&str, HandlerError> {
        self.value(name)?
            .as_str()
            .ok_or_else(|| HandlerError::WrongArgumentType {
                name: name.to_string(),
                expected: "string",
            })
    }

    pub fn opaque<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, HandlerError> {
        match self.require(name)? {
            EventArg::Opaque(any) => Arc::clone(any).downcast::<T>().map_err(|_| {
                HandlerError::WrongArgumentType {
                    name: name.to_string(),
                    expected: std::any::type_name::<T>(),
                }
            }),
            _ => Err(HandlerError::WrongArgumentType {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// `sessionId` argument, else the id of the attached session or message.
    pub fn session_id(&self) -> Option<String> {
        if let Ok(id) = self.str_arg("sessionId") {
            return Some(id.to_string());
        }
        if let Ok(s) = self.session() {
            return Some(s.session_id().to_string());
        }
        self.message().ok().and_then(InboundMessage::session_id)
    }

    /// `siteId` argument, else the site of the attached session or message.
    pub fn site_id(&self) -> Option<String> {
        if let Ok(id) = self.str_arg("siteId") {
            return Some(id.to_string());
        }
        if let Ok(s) = self.session() {
            return Some(s.site_id().to_string());
        }
        self.message().ok().and_then(InboundMessage::site_id)
    }

    /// Every argument that survives serialization. The rest is dropped silently.
    pub fn transport_payload(&self) -> Value {
        let map: Map<String, Value> = self
            .args
            .iter()
            .filter_map(|(k, v)| v.to_transport().map(|v| (k.clone(), v)))
            .collect();
        Value::Object(map)
    }
}

/// Parameters of one dispatch pass.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub(crate) event: Event,
    pub(crate) exclude: Vec<String>,
    pub(crate) target: Option<String>,
    pub(crate) propagate_to_skills: bool,
}

impl Broadcast {
    pub fn new(kind: EventKind) -> Self {
        Self {
            event: Event::new(kind),
            exclude: Vec::new(),
            target: None,
            propagate_to_skills: false,
        }
    }

    /// Components that must not receive this event. Callers name themselves here.
    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    /// Deliver only to `name` (the session owner still runs first).
    pub fn to(mut self, name: impl Into<String>) -> Self {
        self.target = Some(name.into());
        self
    }

    pub fn propagate_to_skills(mut self) -> Self {
        self.propagate_to_skills = true;
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<EventArg>) -> Self {
        self.event.args.push((name.into(), value.into()));
        self
    }

    pub fn kind(&self) -> &EventKind {
        &self.event.kind
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}
