//! Event fan-out to components, skills and the external bus.
//!
//! A pass is synchronous: `broadcast` returns once every in-process handler
//! has run. Handlers may broadcast again from inside a pass; no registry lock
//! is held while a handler runs.

use crate::bus::MessageBus;
use crate::error::{DialogError, DialogResult, HandlerError};
use crate::event::{Broadcast, EventKind};
use crate::registry::ComponentRegistry;
use crate::skills::SkillRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Component that owns session state. It always runs before the fan-out.
pub const SESSION_OWNER: &str = "DialogManager";

/// Name of the top-level host; implicitly excluded from every pass.
pub const HOST_NAME: &str = "PagiHost";

/// What happened during one pass.
#[derive(Debug, Default, Clone)]
pub struct DispatchReport {
    /// Components whose handler ran without error, in call order.
    pub delivered: Vec<String>,
    pub failures: Vec<(String, HandlerError)>,
    /// Dead entries removed after the pass.
    pub purged: usize,
    pub skills_notified: usize,
    /// True when the call had neither exclusions nor a target.
    pub rejected: bool,
    pub echoed: bool,
}

impl DispatchReport {
    pub fn was_delivered_to(&self, name: &str) -> bool {
        self.delivered.iter().any(|n| n == name)
    }
}

pub struct Dispatcher {
    registry: Arc<ComponentRegistry>,
    skills: Arc<SkillRegistry>,
    bus: Arc<dyn MessageBus>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        skills: Arc<SkillRegistry>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            registry,
            skills,
            bus,
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn skills(&self) -> &Arc<SkillRegistry> {
        &self.skills
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Publish a protocol message directly, without an in-process pass.
    pub fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload);
    }

    /// Run one dispatch pass.
    ///
    /// Only a rejected session transition in the session owner aborts the
    /// pass; every other handler error is logged and recorded in the report.
    pub fn broadcast(&self, broadcast: Broadcast) -> DialogResult<DispatchReport> {
        let Broadcast {
            event,
            mut exclude,
            target,
            propagate_to_skills,
        } = broadcast;
        let mut report = DispatchReport::default();

        if exclude.is_empty() && target.is_none() {
            warn!(
                event = %event.kind,
                "Broadcast rejected: no exclusions and no target, a caller must exclude itself"
            );
            report.rejected = true;
            return Ok(report);
        }
        exclude.push(HOST_NAME.to_string());

        debug!(event = %event.kind, ?exclude, ?target, "Dispatching");
        let entries = self.registry.snapshot();
        let mut dead: Vec<String> = Vec::new();

        if !exclude.iter().any(|n| n == SESSION_OWNER) {
            if let Some(owner) = entries.iter().find(|e| e.name == SESSION_OWNER) {
                match &owner.instance {
                    None => dead.push(owner.name.clone()),
                    Some(instance) if owner.handles(&event.kind) => match instance.handle(&event) {
                        Ok(()) => report.delivered.push(owner.name.clone()),
                        Err(e) if e.is_fatal() => {
                            error!(event = %event.kind, error = %e, "Session owner rejected event, dispatch aborted");
                            return Err(DialogError::DispatchAborted {
                                event: event.kind.event_name().to_string(),
                                reason: e.to_string(),
                            });
                        }
                        Err(e) => {
                            warn!(component = SESSION_OWNER, event = %event.kind, error = %e, "Handler failed");
                            report.failures.push((owner.name.clone(), e));
                        }
                    },
                    Some(_) => {}
                }
            }
        }

        for entry in &entries {
            if entry.name == SESSION_OWNER {
                continue;
            }
            let Some(instance) = &entry.instance else {
                dead.push(entry.name.clone());
                continue;
            };
            if exclude.iter().any(|n| n == &entry.name) {
                continue;
            }
            if target.as_ref().is_some_and(|t| t != &entry.name) {
                continue;
            }
            if !entry.handles(&event.kind) {
                continue;
            }
            match instance.handle(&event) {
                Ok(()) => report.delivered.push(entry.name.clone()),
                Err(e) => {
                    if e.is_signature_mismatch() {
                        warn!(component = %entry.name, handler = %event.kind.handler_name(), error = %e, "Handler signature mismatch");
                    } else {
                        warn!(component = %entry.name, event = %event.kind, error = %e, "Handler failed");
                    }
                    report.failures.push((entry.name.clone(), e));
                }
            }
        }

        if !dead.is_empty() {
            report.purged = self.registry.purge(&dead);
            debug!(purged = report.purged, "Dead components purged");
        }

        if propagate_to_skills {
            report.skills_notified = self.skills.broadcast(&event, &exclude);
        }

        // Raw audio is too chatty to echo.
        if event.kind != EventKind::AudioFrame {
            self.bus
                .publish(&event.kind.handler_name(), event.transport_payload());
            report.echoed = true;
        }

        Ok(report)
    }

    /// Stop every component and empty the registry.
    pub fn shutdown(&self) {
        self.registry.stop_all();
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::error::HandlerResult;
    use crate::event::{Event, EventArg};
    use crate::protected::ProtectedIntents;
    use crate::registry::Component;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        result: HandlerResult,
    }

    impl Component for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn subscriptions(&self) -> Vec<EventKind> {
            vec![EventKind::SkillInstalled, EventKind::AudioFrame]
        }

        fn handle(&self, _event: &Event) -> HandlerResult {
            self.calls.lock().unwrap().push(self.name.to_string());
            self.result.clone()
        }
    }

    fn setup(
        results: &[(&'static str, HandlerResult)],
    ) -> (Dispatcher, Arc<Mutex<Vec<String>>>, Arc<MemoryBus>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(ComponentRegistry::new());
        for (name, result) in results {
            registry
                .register(Arc::new(Recorder {
                    name: *name,
                    calls: Arc::clone(&calls),
                    result: result.clone(),
                }))
                .unwrap();
        }
        let bus = Arc::new(MemoryBus::new());
        let skills = Arc::new(SkillRegistry::new(Arc::new(ProtectedIntents::new())));
        let dispatcher = Dispatcher::new(registry, skills, bus.clone());
        (dispatcher, calls, bus)
    }

    #[test]
    fn target_limits_fan_out_but_owner_runs_first() {
        let (dispatcher, calls, _) =
            setup(&[("A", Ok(())), ("B", Ok(())), (SESSION_OWNER, Ok(()))]);
        let report = dispatcher
            .broadcast(Broadcast::new(EventKind::SkillInstalled).to("B"))
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![SESSION_OWNER.to_string(), "B".to_string()]);
        assert!(!report.was_delivered_to("A"));
    }

    #[test]
    fn mismatches_do_not_stop_fan_out() {
        let (dispatcher, calls, _) = setup(&[
            ("A", Err(HandlerError::MissingArgument("session".into()))),
            ("B", Ok(())),
        ]);
        let report = dispatcher
            .broadcast(Broadcast::new(EventKind::SkillInstalled).excluding("Caller"))
            .unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.was_delivered_to("B"));
    }

    #[test]
    fn fatal_owner_error_aborts() {
        let (dispatcher, calls, bus) = setup(&[
            (SESSION_OWNER, Err(HandlerError::Transition("ENDED -> LISTENING".into()))),
            ("A", Ok(())),
        ]);
        let err = dispatcher
            .broadcast(Broadcast::new(EventKind::SkillInstalled).excluding("Caller"))
            .unwrap_err();
        assert!(matches!(err, DialogError::DispatchAborted { .. }));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert!(bus.messages().is_empty());
    }

    #[test]
    fn echo_drops_opaque_args_and_skips_audio() {
        let (dispatcher, _, bus) = setup(&[("A", Ok(()))]);
        dispatcher
            .broadcast(
                Broadcast::new(EventKind::SkillInstalled)
                    .excluding("Caller")
                    .arg("skill", "Weather")
                    .arg("handle", EventArg::opaque(42u32)),
            )
            .unwrap();
        let echoed = bus.on_topic("onSkillInstalled");
        assert_eq!(echoed.len(), 1);
        assert_eq!(echoed[0].payload["skill"], "Weather");
        assert!(echoed[0].payload.get("handle").is_none());

        let report = dispatcher
            .broadcast(Broadcast::new(EventKind::AudioFrame).excluding("Caller"))
            .unwrap();
        assert!(!report.echoed);
        assert!(bus.on_topic("onAudioFrame").is_empty());
    }
}
