//! Speech recognition: the engine contract, decode cycles and the manager
//! that keeps exactly one engine active.

mod cycle;
mod manager;
mod recorder;

pub use cycle::DecodeCycle;
pub use manager::{select_engine, AsrManager, SelectionPolicy};
pub use recorder::{AudioFrame, Recorder, RecorderSignal};

use crate::error::DialogResult;
use crate::session::DialogSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Final transcript of one decode cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrResult {
    pub text: String,
    pub session_id: String,
    pub site_id: String,
    /// Always within `[0, 1]`.
    pub likelihood: f64,
    pub processing_time: Duration,
}

impl AsrResult {
    pub fn new(
        text: impl Into<String>,
        session: &DialogSession,
        likelihood: f64,
        processing_time: Duration,
    ) -> Self {
        let likelihood = if likelihood.is_nan() {
            0.0
        } else {
            likelihood.clamp(0.0, 1.0)
        };
        Self {
            text: text.into(),
            session_id: session.session_id().to_string(),
            site_id: session.site_id().to_string(),
            likelihood,
            processing_time,
        }
    }
}

/// A pluggable recognition backend.
///
/// `decode_stream` runs on its own thread and may block. It reads audio from
/// the cycle until the cycle stops capturing and returns `None` when nothing
/// was recognized or the cycle timed out.
pub trait AsrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Open-vocabulary capture, as opposed to a fixed grammar.
    fn capable_of_arbitrary_capture(&self) -> bool;

    /// Needs network access to decode.
    fn is_online(&self) -> bool;

    fn on_start(&self) -> DialogResult<()> {
        Ok(())
    }

    fn on_stop(&self) {}

    fn decode_stream(&self, session: &DialogSession, cycle: &DecodeCycle) -> Option<AsrResult>;

    fn on_vad_up(&self, cycle: &DecodeCycle) {
        cycle.vad_up();
    }

    fn on_vad_down(&self, cycle: &DecodeCycle) {
        cycle.vad_down();
    }
}

/// Engines available for selection, by identifier.
#[derive(Default, Clone)]
pub struct EngineCatalog {
    engines: HashMap<String, Arc<dyn AsrEngine>>,
}

impl EngineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers are case-insensitive.
    pub fn register(&mut self, engine: Arc<dyn AsrEngine>) {
        self.engines.insert(engine.name().to_lowercase(), engine);
    }

    pub fn with(mut self, engine: Arc<dyn AsrEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AsrEngine>> {
        self.engines.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;

    #[test]
    fn likelihood_is_clamped() {
        let store = SessionStore::new();
        let session = store.create("den", None);
        assert_eq!(AsrResult::new("x", &session, 3.2, Duration::ZERO).likelihood, 1.0);
        assert_eq!(AsrResult::new("x", &session, -1.0, Duration::ZERO).likelihood, 0.0);
        assert_eq!(AsrResult::new("x", &session, f64::NAN, Duration::ZERO).likelihood, 0.0);
    }
}
