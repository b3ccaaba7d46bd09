//! Locale tables used on the recognition path.

use crate::config::DialogConfig;

/// Active-language view over the configured separator, replacement and cancel tables.
#[derive(Debug, Clone)]
pub struct LanguageManager {
    active: String,
    separators: Vec<String>,
    replacements: Vec<(String, String)>,
    cancel_phrases: Vec<String>,
}

impl LanguageManager {
    pub fn from_config(config: &DialogConfig) -> Self {
        let active = config.active_language.clone();
        let mut separators = config
            .intent_separators
            .get(&active)
            .cloned()
            .unwrap_or_default();
        // Longest first so "and after that" wins over a bare "and".
        separators.sort_by_key(|s| std::cmp::Reverse(s.len()));
        separators.retain(|s| !s.trim().is_empty());

        Self {
            replacements: config.nlu_replacements.get(&active).cloned().unwrap_or_default(),
            cancel_phrases: config.cancel_phrases.get(&active).cloned().unwrap_or_default(),
            separators,
            active,
        }
    }

    pub fn active_language(&self) -> &str {
        &self.active
    }

    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    /// Normalize a transcript for the NLU: math symbols become words,
    /// whitespace is collapsed. `-` is only replaced when spaced.
    pub fn sanitize_nlu_query(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (from, to) in &self.replacements {
            out = out.replace(from.as_str(), to.as_str());
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn is_cancel_phrase(&self, text: &str) -> bool {
        let normalized = text
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_lowercase();
        self.cancel_phrases
            .iter()
            .any(|p| p.to_lowercase() == normalized)
    }
}
