//! Shared fixtures: a scripted recognition engine and a host on a recording bus.

#![allow(dead_code)]

use pagi_dialog::{
    AsrEngine, AsrResult, DecodeCycle, DialogConfig, DialogHost, DialogSession, EngineCatalog,
    InboundMessage, MemoryBus, SkillPlugin,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(5);

/// Returns queued transcripts in order, one per decode. Reads audio until capture stops.
pub struct ScriptedEngine {
    name: &'static str,
    online: bool,
    transcripts: Mutex<VecDeque<String>>,
    pub decodes: AtomicUsize,
    pub frames: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(name: &'static str, online: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            online,
            transcripts: Mutex::new(VecDeque::new()),
            decodes: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn say(&self, text: &str) {
        self.transcripts.lock().unwrap().push_back(text.to_string());
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AsrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        self.name
    }

    fn capable_of_arbitrary_capture(&self) -> bool {
        true
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn on_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn decode_stream(&self, session: &DialogSession, cycle: &DecodeCycle) -> Option<AsrResult> {
        while cycle.next_frame().is_some() {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let text = self.transcripts.lock().unwrap().pop_front()?;
        Some(AsrResult::new(text, session, 0.9, cycle.elapsed()))
    }
}

/// Consumes every intent it is offered and remembers them.
#[derive(Default)]
pub struct RecordingSkill {
    pub intents: Mutex<Vec<String>>,
}

impl SkillPlugin for RecordingSkill {
    fn skill_name(&self) -> &str {
        "Recording"
    }

    fn on_message(&self, intent: &str, _session: &DialogSession) -> bool {
        self.intents.lock().unwrap().push(intent.to_string());
        true
    }

    fn protected_intents(&self) -> Vec<String> {
        vec!["Recording:Stop".to_string()]
    }
}

pub struct Harness {
    pub host: DialogHost,
    pub bus: Arc<MemoryBus>,
    pub cloud: Arc<ScriptedEngine>,
    pub local: Arc<ScriptedEngine>,
}

pub fn config() -> DialogConfig {
    DialogConfig {
        asr: "cloud".to_string(),
        asr_fallback: "local".to_string(),
        ..DialogConfig::default()
    }
}

pub fn harness(config: DialogConfig, online: bool) -> Harness {
    let cloud = ScriptedEngine::new("cloud", true);
    let local = ScriptedEngine::new("local", false);
    let catalog = EngineCatalog::new()
        .with(cloud.clone())
        .with(local.clone());
    let bus = Arc::new(MemoryBus::new());
    let host = DialogHost::new(config, catalog, bus.clone(), online).unwrap();
    host.start().unwrap();
    Harness {
        host,
        bus,
        cloud,
        local,
    }
}

pub fn message(topic: &str, payload: Value) -> InboundMessage {
    InboundMessage::new(topic, payload)
}

/// Payloads published on `topic`, oldest first.
pub fn payloads(bus: &MemoryBus, topic: &str) -> Vec<Value> {
    bus.on_topic(topic).into_iter().map(|m| m.payload).collect()
}

/// Wait until `topic` has been published at least `count` times.
pub fn wait_for_count(bus: &MemoryBus, topic: &str, count: usize) -> bool {
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if bus.on_topic(topic).len() >= count {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
