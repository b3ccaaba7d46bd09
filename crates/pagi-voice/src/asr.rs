//! **Recognition engines**: `AsrEngine` implementations for the dialog core.
//!
//! Each engine reads audio from a `DecodeCycle` until capture stops (VAD down,
//! timeout or cancellation) and turns it into text. Use `default_catalog` to
//! register every engine available in this environment.

use crate::error::{VoiceError, VoiceResult};
use crate::wav::pcm_f32_to_wav;
use pagi_dialog::{AsrEngine, AsrResult, DecodeCycle, DialogConfig, DialogSession, EngineCatalog};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Audio captured during one cycle, concatenated.
struct Capture {
    samples: Vec<f32>,
    sample_rate: u32,
    frames: usize,
}

/// Read frames until the cycle stops capturing. `on_frame` sees the running sample count.
fn capture(cycle: &DecodeCycle, mut on_frame: impl FnMut(usize)) -> Capture {
    let mut samples = Vec::new();
    let mut sample_rate = 16000;
    let mut frames = 0;
    while let Some(frame) = cycle.next_frame() {
        sample_rate = frame.sample_rate;
        samples.extend_from_slice(&frame.samples);
        frames += 1;
        on_frame(samples.len());
    }
    Capture {
        samples,
        sample_rate,
        frames,
    }
}

fn finish(text: String, session: &DialogSession, likelihood: f64, cycle: &DecodeCycle) -> Option<AsrResult> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(AsrResult::new(text, session, likelihood, cycle.elapsed()))
}

/// Offline engine for wiring tests and demos: answers with a fixed transcript.
#[derive(Debug, Default)]
pub struct PlaceholderAsr {
    /// If set, return this instead of the default message.
    pub response: Option<String>,
}

impl PlaceholderAsr {
    pub const NAME: &'static str = "placeholder";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self {
            response: Some(s.into()),
        }
    }
}

impl AsrEngine for PlaceholderAsr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capable_of_arbitrary_capture(&self) -> bool {
        false
    }

    fn is_online(&self) -> bool {
        false
    }

    fn decode_stream(&self, session: &DialogSession, cycle: &DecodeCycle) -> Option<AsrResult> {
        let capture = capture(cycle, |samples| {
            cycle.partial_text_captured(&format!("[{samples} samples]"), 0.5);
        });
        if capture.frames == 0 {
            debug!(session_id = session.session_id(), "Placeholder ASR heard nothing");
            return None;
        }
        let text = match &self.response {
            Some(r) => r.clone(),
            None => format!(
                "[ASR placeholder: {} samples, {:.1}s]",
                capture.samples.len(),
                capture.samples.len() as f32 / capture.sample_rate.max(1) as f32
            ),
        };
        finish(text, session, 1.0, cycle)
    }
}

/// Online engine: OpenAI-compatible transcription API (OpenAI Whisper, OpenRouter, etc.).
/// Uses `STT_API_URL` (e.g. https://api.openai.com/v1), `STT_API_KEY`, and `STT_MODEL` (default whisper-1).
#[derive(Debug, Clone)]
pub struct OpenRouterAsr {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model: whisper-1 or gpt-4o-transcribe, etc.
    pub model: String,
    client: reqwest::Client,
}

impl OpenRouterAsr {
    pub const NAME: &'static str = "openrouter";

    /// Build from environment: STT_API_URL, STT_API_KEY (or PAGI_LLM_API_KEY / OPENROUTER_API_KEY), STT_MODEL.
    pub fn from_env(timeout: Duration) -> VoiceResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("PAGI_LLM_API_KEY"))
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .map_err(|_| {
                VoiceError::Config(
                    "ASR requires STT_API_KEY, PAGI_LLM_API_KEY, or OPENROUTER_API_KEY".to_string(),
                )
            })?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model, timeout)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> VoiceResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Upload one utterance and return the transcript.
    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(samples, sample_rate);
        let url = format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'));
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Asr(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }

    /// Decode threads are plain threads, so each upload gets its own small runtime.
    fn transcribe_blocking(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.transcribe(samples, sample_rate))
    }
}

impl AsrEngine for OpenRouterAsr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capable_of_arbitrary_capture(&self) -> bool {
        true
    }

    fn is_online(&self) -> bool {
        true
    }

    fn decode_stream(&self, session: &DialogSession, cycle: &DecodeCycle) -> Option<AsrResult> {
        let capture = capture(cycle, |_| {});
        if capture.samples.is_empty() || cycle.timed_out() {
            return None;
        }
        match self.transcribe_blocking(&capture.samples, capture.sample_rate) {
            Ok(text) => finish(text, session, 1.0, cycle),
            Err(e) => {
                warn!(session_id = session.session_id(), error = %e, "Transcription failed");
                None
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Local Whisper ASR (optional feature). Requires whisper.cpp/ggml; see README.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_asr {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper ASR: loads a ggml quantized model (e.g. ggml-base.en.bin) and runs
    /// inference on-device. Audio must be 16 kHz mono f32.
    pub struct WhisperAsr {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
        language: String,
    }

    impl WhisperAsr {
        pub const NAME: &'static str = "whisper";

        /// Load the Whisper model from `model_path` (e.g. path to ggml-base.en.bin).
        pub fn new(model_path: &str, language: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Asr(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Asr(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Mutex::new(state),
                language: language.to_string(),
            })
        }

        /// Build from env: `WHISPER_MODEL_PATH` must point to a .bin model file.
        pub fn from_env(language: &str) -> VoiceResult<Self> {
            let path = std::env::var("WHISPER_MODEL_PATH")
                .map_err(|_| VoiceError::Config("WHISPER_MODEL_PATH not set".to_string()))?;
            let path = path.trim();
            if path.is_empty() {
                return Err(VoiceError::Config("WHISPER_MODEL_PATH is empty".to_string()));
            }
            Self::new(path, language)
        }

        fn transcribe(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<String> {
            if sample_rate != 16000 {
                return Err(VoiceError::Asr(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    sample_rate
                )));
            }
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some(&self.language));

            let mut state = self
                .state
                .lock()
                .map_err(|e| VoiceError::Asr(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(params, samples)
                .map_err(|e| VoiceError::Asr(format!("Whisper inference failed: {}", e)))?;
            Ok(state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok().map(str::to_string))
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string())
        }
    }

    impl AsrEngine for WhisperAsr {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn capable_of_arbitrary_capture(&self) -> bool {
            true
        }

        fn is_online(&self) -> bool {
            false
        }

        fn decode_stream(&self, session: &DialogSession, cycle: &DecodeCycle) -> Option<AsrResult> {
            let capture = capture(cycle, |_| {});
            if capture.samples.is_empty() || cycle.timed_out() {
                return None;
            }
            match self.transcribe(&capture.samples, capture.sample_rate) {
                Ok(text) => finish(text, session, 1.0, cycle),
                Err(e) => {
                    warn!(session_id = session.session_id(), error = %e, "Whisper decode failed");
                    None
                }
            }
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_asr::WhisperAsr;

/// Every engine usable in this environment.
///
/// The placeholder is always present so a fallback exists. OpenRouter is added
/// when an API key is configured, Whisper (with the `whisper` feature) when
/// `WHISPER_MODEL_PATH` loads.
pub fn default_catalog(config: &DialogConfig) -> EngineCatalog {
    let mut catalog = EngineCatalog::new().with(Arc::new(PlaceholderAsr::new()));

    #[cfg(feature = "whisper")]
    {
        match whisper_asr::WhisperAsr::from_env(&config.active_language) {
            Ok(w) => catalog.register(Arc::new(w)),
            Err(e) => debug!(error = %e, "Whisper ASR unavailable"),
        }
    }

    match OpenRouterAsr::from_env(config.asr_timeout()) {
        Ok(open) => catalog.register(Arc::new(open)),
        Err(e) => debug!(error = %e, "OpenRouter ASR unavailable"),
    }

    info!(engines = ?catalog.names(), "🎙️ ASR engines available");
    catalog
}
