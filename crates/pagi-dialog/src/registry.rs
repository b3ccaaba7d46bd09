//! Component registry. One owned instance is handed to everything that needs lookups.

use crate::error::{DialogError, DialogResult, HandlerResult};
use crate::event::{Event, EventKind};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// A long-lived host component that reacts to dispatched events.
pub trait Component: Send + Sync {
    /// Unique name used for exclusion and targeting.
    fn name(&self) -> &str;

    /// Event kinds this component handles. Read once at registration.
    fn subscriptions(&self) -> Vec<EventKind>;

    fn handle(&self, event: &Event) -> HandlerResult;

    fn on_init(&self) -> DialogResult<()> {
        Ok(())
    }

    fn on_start(&self) -> DialogResult<()> {
        Ok(())
    }

    fn on_stop(&self) {}
}

/// Registry slot. `instance` is `None` once the component has been retired.
#[derive(Clone)]
pub struct Entry {
    pub name: String,
    pub instance: Option<Arc<dyn Component>>,
    pub handlers: Arc<HashSet<EventKind>>,
}

impl Entry {
    pub fn handles(&self, kind: &EventKind) -> bool {
        self.handlers.contains(kind)
    }

    pub fn is_dead(&self) -> bool {
        self.instance.is_none()
    }
}

/// Ordered name -> component mapping with `init -> start -> stop` lifecycle.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component and run its `on_init`. Names are unique.
    pub fn register(&self, component: Arc<dyn Component>) -> DialogResult<()> {
        let name = component.name().to_string();
        if self.contains(&name) {
            return Err(DialogError::Component(format!("{name} is already registered")));
        }
        component.on_init()?;
        let handlers: HashSet<EventKind> = component.subscriptions().into_iter().collect();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                name: name.clone(),
                instance: Some(component),
                handlers: Arc::new(handlers),
            });
        info!(component = %name, "Component registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.instance.clone())
    }

    /// True for any entry with this name, dead or alive.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the instance but keep the slot; the next dispatch pass purges it.
    pub fn retire(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                if let Some(instance) = entry.instance.take() {
                    instance.on_stop();
                }
                true
            }
            None => false,
        }
    }

    /// Entries as they are at this instant. Dispatch iterates this, not the live list.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove named entries, but only if they are still dead.
    pub fn purge(&self, names: &[String]) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| !(e.is_dead() && names.contains(&e.name)));
        before - entries.len()
    }

    /// Remove every dead entry.
    pub fn purge_dead(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| !e.is_dead());
        before - entries.len()
    }

    pub fn start_all(&self) -> DialogResult<()> {
        for entry in self.snapshot() {
            if let Some(instance) = entry.instance {
                instance.on_start()?;
            }
        }
        Ok(())
    }

    /// Stop in reverse registration order.
    pub fn stop_all(&self) {
        for entry in self.snapshot().into_iter().rev() {
            if let Some(instance) = entry.instance {
                instance.on_stop();
            }
        }
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.entries.write().unwrap_or_else(PoisonError::into_inner));
        if !removed.is_empty() {
            warn!(count = removed.len(), "Registry cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Component for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn subscriptions(&self) -> Vec<EventKind> {
            vec![EventKind::Booted]
        }

        fn handle(&self, _event: &Event) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = ComponentRegistry::new();
        registry.register(Arc::new(Named("A"))).unwrap();
        assert!(registry.register(Arc::new(Named("A"))).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn retired_entries_stay_until_purged() {
        let registry = ComponentRegistry::new();
        registry.register(Arc::new(Named("A"))).unwrap();
        registry.register(Arc::new(Named("B"))).unwrap();

        assert!(registry.retire("A"));
        assert!(registry.get("A").is_none());
        assert!(registry.contains("A"));
        assert!(registry.snapshot()[0].is_dead());

        assert_eq!(registry.purge(&["A".to_string(), "B".to_string()]), 1);
        assert_eq!(registry.names(), vec!["B".to_string()]);
        assert!(registry.snapshot()[0].handles(&EventKind::Booted));
    }
}
