//! # PAGI Voice - Recognition Backends
//!
//! Speech recognition engines and voice-activity detection for the dialog core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Audio frames (per site)                  │
//! │          ↓                                   ↓              │
//! │  ┌──────────────────┐              ┌──────────────────┐     │
//! │  │ VoiceActivity    │  vadUp/Down  │   DecodeCycle    │     │
//! │  │ Monitor (WebRTC) │ ───────────→ │  (pagi-dialog)   │     │
//! │  └──────────────────┘              └────────┬─────────┘     │
//! │                                             ↓               │
//! │              ┌──────────────┬───────────────┬─────────┐     │
//! │              │  OpenRouter  │    Whisper    │ Placeh. │     │
//! │              │   (online)   │   (offline)   │(offline)│     │
//! │              └──────────────┴───────────────┴─────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod asr;
pub mod error;
pub mod monitor;
pub mod vad;
pub mod wav;

pub use asr::{default_catalog, OpenRouterAsr, PlaceholderAsr};
#[cfg(feature = "whisper")]
pub use asr::WhisperAsr;
pub use error::{VoiceError, VoiceResult};
pub use monitor::{SiteMonitors, VoiceActivityMonitor};
pub use vad::{VadConfig, VadDetector, VadEdge, VadEdgeTracker};
pub use wav::pcm_f32_to_wav;
