//! Voice Activity Detection using WebRTC VAD
//!
//! `VadDetector` classifies 30 ms chunks; `VadEdgeTracker` debounces those
//! decisions into speech start / end edges.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for VAD detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Sample rate (must be 8000, 16000, 32000, or 48000 Hz for WebRTC VAD)
    pub sample_rate: u32,

    /// Detection mode (0-3, where 3 is most aggressive)
    pub mode: u8,

    /// Minimum speech duration in milliseconds before an up edge (default: 250ms)
    pub min_speech_duration_ms: u32,

    /// Minimum silence duration in milliseconds before a down edge (default: 800ms)
    pub min_silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            mode: 3, // Most aggressive detection
            min_speech_duration_ms: 250,
            min_silence_duration_ms: 800,
        }
    }
}

fn vad_mode(mode: u8) -> VoiceResult<VadMode> {
    match mode {
        0 => Ok(VadMode::Quality),
        1 => Ok(VadMode::LowBitrate),
        2 => Ok(VadMode::Aggressive),
        3 => Ok(VadMode::VeryAggressive),
        other => Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
    }
}

fn vad_rate(sample_rate: u32) -> VoiceResult<SampleRate> {
    match sample_rate {
        8000 => Ok(SampleRate::Rate8kHz),
        16000 => Ok(SampleRate::Rate16kHz),
        32000 => Ok(SampleRate::Rate32kHz),
        48000 => Ok(SampleRate::Rate48kHz),
        other => Err(VoiceError::Config(format!(
            "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
            other
        ))),
    }
}

/// Voice Activity Detector using WebRTC VAD
pub struct VadDetector {
    vad: Vad,
    config: VadConfig,
    chunk_size: usize,
}

impl VadDetector {
    /// Create a new VAD detector with the given configuration
    pub fn new(config: VadConfig) -> VoiceResult<Self> {
        let mode = vad_mode(config.mode)?;
        let rate = vad_rate(config.sample_rate)?;

        // WebRTC VAD accepts 10, 20 or 30 ms frames; 30 ms at 16 kHz is 480 samples.
        let chunk_size = (config.sample_rate as usize * 30) / 1000;

        let mut vad = Vad::new();
        vad.set_mode(mode);
        vad.set_sample_rate(rate);

        info!(
            sample_rate = config.sample_rate,
            mode = config.mode,
            chunk_size,
            "🎙️ WebRTC VAD initialized"
        );
        Ok(Self {
            vad,
            config,
            chunk_size,
        })
    }

    /// Classify one chunk of exactly `chunk_size` samples.
    pub fn is_speech(&mut self, audio: &[f32]) -> VoiceResult<bool> {
        if audio.len() != self.chunk_size {
            return Err(VoiceError::VadProcessing(format!(
                "Expected {} samples, got {}",
                self.chunk_size,
                audio.len()
            )));
        }
        let audio_i16: Vec<i16> = audio
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        self.vad
            .is_voice_segment(&audio_i16)
            .map_err(|e| VoiceError::VadProcessing(format!("VAD processing failed: {:?}", e)))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(30)
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// WebRTC VAD has no explicit reset, so recreate it.
    pub fn reset(&mut self) -> VoiceResult<()> {
        let mut vad = Vad::new();
        vad.set_mode(vad_mode(self.config.mode)?);
        vad.set_sample_rate(vad_rate(self.config.sample_rate)?);
        self.vad = vad;
        Ok(())
    }
}

/// A debounced change in voice activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEdge {
    Up,
    Down,
}

/// Turns per-chunk speech decisions into up/down edges.
///
/// Speech must last `min_speech` before `Up`; after that, silence must last
/// `min_silence` before `Down`. Short blips in either direction are ignored.
#[derive(Debug, Clone)]
pub struct VadEdgeTracker {
    min_speech: Duration,
    min_silence: Duration,
    speaking: bool,
    run: Duration,
}

impl VadEdgeTracker {
    pub fn new(min_speech: Duration, min_silence: Duration) -> Self {
        Self {
            min_speech,
            min_silence,
            speaking: false,
            run: Duration::ZERO,
        }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_speech_duration_ms.into()),
            Duration::from_millis(config.min_silence_duration_ms.into()),
        )
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one classified chunk of length `chunk`.
    pub fn update(&mut self, is_speech: bool, chunk: Duration) -> Option<VadEdge> {
        if is_speech == self.speaking {
            self.run = Duration::ZERO;
            return None;
        }
        self.run += chunk;
        let needed = if self.speaking {
            self.min_silence
        } else {
            self.min_speech
        };
        if self.run < needed {
            return None;
        }
        self.speaking = is_speech;
        self.run = Duration::ZERO;
        let edge = if is_speech { VadEdge::Up } else { VadEdge::Down };
        debug!(?edge, "VAD edge");
        Some(edge)
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.run = Duration::ZERO;
    }
}
