//! Process-wide set of intents that must never be filtered out of a session.

use std::sync::{PoisonError, RwLock};

/// Intent paths are compared by their leaf segment only.
fn normalize(intent: &str) -> &str {
    intent.rsplit('/').next().unwrap_or(intent)
}

/// Append-only registry. Protection lasts for the lifetime of the process.
#[derive(Debug, Default)]
pub struct ProtectedIntents {
    intents: RwLock<Vec<String>>,
}

impl ProtectedIntents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; returns true when the intent was not protected yet.
    pub fn protect(&self, intent: &str) -> bool {
        let leaf = normalize(intent);
        if leaf.is_empty() {
            return false;
        }
        let mut intents = self.intents.write().unwrap_or_else(PoisonError::into_inner);
        if intents.iter().any(|i| i == leaf) {
            return false;
        }
        intents.push(leaf.to_string());
        tracing::debug!(intent = leaf, "Intent protected");
        true
    }

    pub fn is_protected(&self, intent: &str) -> bool {
        let leaf = normalize(intent);
        self.intents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|i| i == leaf)
    }

    /// Snapshot in registration order.
    pub fn intents(&self) -> Vec<String> {
        self.intents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Intent filter for the next NLU pass.
    ///
    /// An empty allow-list means the session is unrestricted and stays empty.
    /// Otherwise every protected intent is appended so it can always resolve.
    pub fn scoped_filter(&self, session_filter: &[String], defaults: &[String]) -> Vec<String> {
        let base = if session_filter.is_empty() {
            defaults
        } else {
            session_filter
        };
        if base.is_empty() {
            return Vec::new();
        }
        let mut filter = base.to_vec();
        for intent in self.intents() {
            if !filter.iter().any(|f| normalize(f) == intent) {
                filter.push(intent);
            }
        }
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_normalizes_to_leaf() {
        let registry = ProtectedIntents::new();
        assert!(registry.protect("hermes/intent/GlobalStop"));
        assert!(!registry.protect("GlobalStop"));
        assert!(registry.is_protected("GlobalStop"));
        assert!(registry.is_protected("other/prefix/GlobalStop"));
        assert!(!registry.is_protected("GlobalStart"));
        assert_eq!(registry.intents(), vec!["GlobalStop".to_string()]);
    }

    #[test]
    fn scoped_filter_appends_protected() {
        let registry = ProtectedIntents::new();
        registry.protect("GlobalStop");

        let filter = registry.scoped_filter(&["Weather:Ask".to_string()], &[]);
        assert_eq!(filter, vec!["Weather:Ask".to_string(), "GlobalStop".to_string()]);

        assert!(registry.scoped_filter(&[], &[]).is_empty());

        let filter = registry.scoped_filter(&[], &["GlobalStop".to_string()]);
        assert_eq!(filter, vec!["GlobalStop".to_string()]);
    }
}
