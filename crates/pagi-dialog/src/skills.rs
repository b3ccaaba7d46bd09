//! Skill plugins: intent handlers that also receive propagated events.

use crate::error::HandlerResult;
use crate::event::Event;
use crate::protected::ProtectedIntents;
use crate::session::DialogSession;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Contract every skill satisfies to take part in dispatch.
pub trait SkillPlugin: Send + Sync {
    fn skill_name(&self) -> &str;

    /// Offered a resolved intent. Returns true when the skill consumed it.
    fn on_message(&self, _intent: &str, _session: &DialogSession) -> bool {
        false
    }

    /// Propagated host events. Ignored by default.
    fn on_event(&self, _event: &Event) -> HandlerResult {
        Ok(())
    }

    /// Intents that must never be filtered out of a session while this skill is loaded.
    fn protected_intents(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Loaded skills in load order.
pub struct SkillRegistry {
    skills: RwLock<Vec<Arc<dyn SkillPlugin>>>,
    protected: Arc<ProtectedIntents>,
}

impl SkillRegistry {
    pub fn new(protected: Arc<ProtectedIntents>) -> Self {
        Self {
            skills: RwLock::new(Vec::new()),
            protected,
        }
    }

    /// Load a skill and protect the intents it declares.
    pub fn register(&self, skill: Arc<dyn SkillPlugin>) {
        for intent in skill.protected_intents() {
            self.protected.protect(&intent);
        }
        info!(skill = skill.skill_name(), "Skill loaded");
        self.skills
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(skill);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SkillPlugin>> {
        self.snapshot().into_iter().find(|s| s.skill_name() == name)
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|s| s.skill_name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn SkillPlugin>> {
        self.skills
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver a propagated event to every skill not named in `filter_out`.
    /// Failures are logged per skill. Returns how many skills were called.
    pub fn broadcast(&self, event: &Event, filter_out: &[String]) -> usize {
        let mut called = 0;
        for skill in self.snapshot() {
            if filter_out.iter().any(|n| n == skill.skill_name()) {
                continue;
            }
            called += 1;
            if let Err(e) = skill.on_event(event) {
                warn!(skill = skill.skill_name(), event = %event.kind, error = %e, "Skill handler failed");
            }
        }
        called
    }

    /// Offer an intent to skills in load order. Returns the consuming skill.
    pub fn dispatch_intent(&self, intent: &str, session: &DialogSession) -> Option<String> {
        for skill in self.snapshot() {
            if skill.on_message(intent, session) {
                debug!(skill = skill.skill_name(), intent, "Intent consumed");
                return Some(skill.skill_name().to_string());
            }
        }
        debug!(intent, "No skill consumed intent");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Weather {
        events: AtomicUsize,
    }

    impl SkillPlugin for Weather {
        fn skill_name(&self) -> &str {
            "Weather"
        }

        fn on_message(&self, intent: &str, _session: &DialogSession) -> bool {
            intent.starts_with("Weather:")
        }

        fn on_event(&self, _event: &Event) -> HandlerResult {
            self.events.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Failed("offline".to_string()))
        }

        fn protected_intents(&self) -> Vec<String> {
            vec!["hermes/intent/Weather:Stop".to_string()]
        }
    }

    #[test]
    fn register_protects_declared_intents() {
        let protected = Arc::new(ProtectedIntents::new());
        let skills = SkillRegistry::new(Arc::clone(&protected));
        skills.register(Arc::new(Weather { events: AtomicUsize::new(0) }));
        assert!(protected.is_protected("Weather:Stop"));
        assert_eq!(skills.skill_names(), vec!["Weather".to_string()]);
    }

    #[test]
    fn broadcast_survives_failures_and_filters() {
        let skills = SkillRegistry::new(Arc::new(ProtectedIntents::new()));
        let weather = Arc::new(Weather { events: AtomicUsize::new(0) });
        skills.register(weather.clone());

        let event = Event::new(EventKind::InternetLost);
        assert_eq!(skills.broadcast(&event, &[]), 1);
        assert_eq!(skills.broadcast(&event, &["Weather".to_string()]), 0);
        assert_eq!(weather.events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_intent_finds_consumer() {
        let skills = SkillRegistry::new(Arc::new(ProtectedIntents::new()));
        skills.register(Arc::new(Weather { events: AtomicUsize::new(0) }));
        let session = DialogSession::new("den");
        assert_eq!(skills.dispatch_intent("Weather:Ask", &session).as_deref(), Some("Weather"));
        assert!(skills.dispatch_intent("Lights:On", &session).is_none());
    }
}
