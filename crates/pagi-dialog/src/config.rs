//! Dialog host configuration.
//!
//! Loaded from built-in defaults, an optional TOML file and `PAGI_DIALOG__*`
//! environment variables, in that order of precedence (last wins).

use crate::error::{DialogError, DialogResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn default_asr() -> String {
    "openrouter".to_string()
}

fn default_asr_fallback() -> String {
    "placeholder".to_string()
}

fn default_asr_timeout_secs() -> u64 {
    10
}

fn default_session_timeout_secs() -> u64 {
    20
}

fn default_not_understood_retries() -> u32 {
    3
}

fn default_active_language() -> String {
    "en".to_string()
}

fn default_probe_url() -> String {
    "https://clients3.google.com/generate_204".to_string()
}

fn default_connectivity_check_secs() -> u64 {
    10
}

fn default_housekeeping_secs() -> u64 {
    30
}

fn default_intent_separators() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        "en".to_string(),
        vec!["and then".to_string(), "and after that".to_string()],
    );
    map.insert(
        "fr".to_string(),
        vec!["et puis".to_string(), "et ensuite".to_string()],
    );
    map.insert(
        "de".to_string(),
        vec!["und dann".to_string(), "und danach".to_string()],
    );
    map
}

fn default_nlu_replacements() -> HashMap<String, Vec<(String, String)>> {
    let pairs = |items: &[(&str, &str)]| {
        items
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect::<Vec<_>>()
    };
    let mut map = HashMap::new();
    map.insert(
        "en".to_string(),
        pairs(&[("+", " plus "), (" - ", " minus "), ("*", " times "), ("/", " divided by ")]),
    );
    map.insert(
        "fr".to_string(),
        pairs(&[("+", " plus "), (" - ", " moins "), ("*", " fois "), ("/", " divisé par ")]),
    );
    map.insert(
        "de".to_string(),
        pairs(&[("+", " plus "), (" - ", " minus "), ("*", " mal "), ("/", " geteilt durch ")]),
    );
    map
}

fn default_cancel_phrases() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        "en".to_string(),
        vec!["cancel".to_string(), "never mind".to_string(), "abort".to_string()],
    );
    map.insert("fr".to_string(), vec!["annule".to_string(), "laisse tomber".to_string()]);
    map.insert("de".to_string(), vec!["abbrechen".to_string(), "vergiss es".to_string()]);
    map
}

/// Dialog host configuration.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | asr | openrouter | Engine identifier the operator wants active. |
/// | asr_fallback | placeholder | Offline engine used when the configured one is not eligible. |
/// | keep_asr_offline | false | Only offline engines may decode. |
/// | stay_completely_offline | false | Fully offline mode; also disables the connectivity probe. |
/// | asr_timeout_secs | 10 | Upper bound of one decode cycle. |
/// | session_timeout_secs | 20 | Idle time before a session ends with reason `timeout`. |
/// | not_understood_retries | 3 | Re-prompts allowed before a session is no longer revived. |
/// | active_language | en | Language used for separators, replacements and cancel phrases. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    #[serde(default = "default_asr")]
    pub asr: String,
    #[serde(default = "default_asr_fallback")]
    pub asr_fallback: String,
    #[serde(default)]
    pub keep_asr_offline: bool,
    #[serde(default)]
    pub stay_completely_offline: bool,
    #[serde(default = "default_asr_timeout_secs")]
    pub asr_timeout_secs: u64,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_not_understood_retries")]
    pub not_understood_retries: u32,
    #[serde(default = "default_active_language")]
    pub active_language: String,
    /// Separator phrases per language that split compound utterances.
    #[serde(default = "default_intent_separators")]
    pub intent_separators: HashMap<String, Vec<String>>,
    /// Ordered `[from, to]` replacements applied to transcripts before NLU.
    #[serde(default = "default_nlu_replacements")]
    pub nlu_replacements: HashMap<String, Vec<(String, String)>>,
    /// Phrases that abort the session instead of reaching NLU.
    #[serde(default = "default_cancel_phrases")]
    pub cancel_phrases: HashMap<String, Vec<String>>,
    /// Intents allowed when a session carries no filter of its own.
    #[serde(default)]
    pub default_intent_filter: Vec<String>,
    #[serde(default = "default_probe_url")]
    pub connectivity_probe_url: String,
    #[serde(default = "default_connectivity_check_secs")]
    pub connectivity_check_secs: u64,
    #[serde(default = "default_housekeeping_secs")]
    pub housekeeping_secs: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            asr: default_asr(),
            asr_fallback: default_asr_fallback(),
            keep_asr_offline: false,
            stay_completely_offline: false,
            asr_timeout_secs: default_asr_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            not_understood_retries: default_not_understood_retries(),
            active_language: default_active_language(),
            intent_separators: default_intent_separators(),
            nlu_replacements: default_nlu_replacements(),
            cancel_phrases: default_cancel_phrases(),
            default_intent_filter: Vec::new(),
            connectivity_probe_url: default_probe_url(),
            connectivity_check_secs: default_connectivity_check_secs(),
            housekeeping_secs: default_housekeeping_secs(),
        }
    }
}

impl DialogConfig {
    /// Load config from file and environment. Precedence: env `PAGI_DIALOG_CONFIG` path > `config/dialog` > defaults.
    pub fn load() -> DialogResult<Self> {
        let config_path =
            std::env::var("PAGI_DIALOG_CONFIG").unwrap_or_else(|_| "config/dialog".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load from a file (extension optional, skipped when missing) plus `PAGI_DIALOG__*` overrides.
    pub fn load_from(path: &Path) -> DialogResult<Self> {
        let builder = config::Config::builder()
            .set_default("asr", default_asr())?
            .set_default("asr_fallback", default_asr_fallback())?
            .set_default("active_language", default_active_language())?;

        // `config/dialog` also matches `config/dialog.toml`.
        let built = builder
            .add_source(config::File::with_name(&path.to_string_lossy()).required(false))
            .add_source(config::Environment::with_prefix("PAGI_DIALOG").separator("__"))
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the host cannot run with.
    pub fn validate(&self) -> DialogResult<()> {
        if self.asr.trim().is_empty() {
            return Err(DialogError::Config("asr engine identifier is empty".to_string()));
        }
        if self.asr_fallback.trim().is_empty() {
            return Err(DialogError::Config("asr_fallback is empty".to_string()));
        }
        if self.asr_timeout_secs == 0 {
            return Err(DialogError::Config("asr_timeout_secs must be > 0".to_string()));
        }
        if self.session_timeout_secs == 0 {
            return Err(DialogError::Config("session_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// True when only offline engines may decode.
    pub fn offline_pinned(&self) -> bool {
        self.keep_asr_offline || self.stay_completely_offline
    }

    pub fn asr_timeout(&self) -> Duration {
        Duration::from_secs(self.asr_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = DialogConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.offline_pinned());
        assert_eq!(cfg.asr_timeout(), Duration::from_secs(10));
        assert!(cfg.intent_separators["en"].contains(&"and then".to_string()));
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "asr = \"google\"\nkeep_asr_offline = true\nasr_timeout_secs = 4\n\n[intent_separators]\nen = [\"and\"]"
        )
        .unwrap();

        let cfg = DialogConfig::load_from(file.path()).unwrap();
        assert_eq!(cfg.asr, "google");
        assert_eq!(cfg.asr_fallback, "placeholder");
        assert!(cfg.offline_pinned());
        assert_eq!(cfg.asr_timeout_secs, 4);
        assert_eq!(cfg.intent_separators["en"], vec!["and".to_string()]);
        assert_eq!(cfg.session_timeout_secs, 20);
    }

    #[test]
    fn extensionless_path_finds_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dialog.toml"),
            "asr = \"vosk\"\nasr_fallback = \"snips\"\nsession_timeout_secs = 7\n",
        )
        .unwrap();

        let cfg = DialogConfig::load_from(&dir.path().join("dialog")).unwrap();
        assert_eq!(cfg.asr, "vosk");
        assert_eq!(cfg.asr_fallback, "snips");
        assert_eq!(cfg.session_timeout_secs, 7);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DialogConfig::load_from(&dir.path().join("absent")).unwrap();
        assert_eq!(cfg.asr, default_asr());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = DialogConfig {
            asr_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DialogError::Config(_))));
    }
}
