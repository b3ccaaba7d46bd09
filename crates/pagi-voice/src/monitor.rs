//! Per-device voice activity: audio frames in, `vadUp` / `vadDown` messages out.

use crate::error::{VoiceError, VoiceResult};
use crate::vad::{VadConfig, VadDetector, VadEdge, VadEdgeTracker};
use pagi_dialog::{router, topics, AudioFrame, InboundMessage};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct VoiceActivityMonitor {
    site_id: String,
    detector: VadDetector,
    tracker: VadEdgeTracker,
    pending: Vec<f32>,
}

impl VoiceActivityMonitor {
    pub fn new(site_id: impl Into<String>, config: VadConfig) -> VoiceResult<Self> {
        let tracker = VadEdgeTracker::from_config(&config);
        Ok(Self {
            site_id: site_id.into(),
            detector: VadDetector::new(config)?,
            tracker,
            pending: Vec::new(),
        })
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn is_speaking(&self) -> bool {
        self.tracker.is_speaking()
    }

    /// Classify a frame in detector-sized chunks. Leftover samples wait for the next frame.
    pub fn feed(&mut self, frame: &AudioFrame) -> VoiceResult<Vec<InboundMessage>> {
        let expected = self.detector.config().sample_rate;
        if frame.sample_rate != expected {
            return Err(VoiceError::VadProcessing(format!(
                "frame at {} Hz, detector expects {} Hz",
                frame.sample_rate, expected
            )));
        }
        self.pending.extend_from_slice(&frame.samples);

        let chunk = self.detector.chunk_size();
        let mut messages = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk {
            let speech = self
                .detector
                .is_speech(&self.pending[consumed..consumed + chunk])?;
            consumed += chunk;
            if let Some(edge) = self.tracker.update(speech, self.detector.chunk_duration()) {
                messages.push(self.edge_message(edge));
            }
        }
        self.pending.drain(..consumed);
        Ok(messages)
    }

    fn edge_message(&self, edge: VadEdge) -> InboundMessage {
        let topic = match edge {
            VadEdge::Up => topics::VAD_UP,
            VadEdge::Down => topics::VAD_DOWN,
        };
        info!(site_id = %self.site_id, ?edge, "🗣️ Voice activity");
        InboundMessage::new(topic, json!({"siteId": self.site_id}))
    }

    /// Forget buffered audio and speaking state, e.g. when a session ends.
    pub fn reset(&mut self) -> VoiceResult<()> {
        self.pending.clear();
        self.tracker.reset();
        self.detector.reset()
    }
}

/// One monitor per device, created on its first audio frame.
pub struct SiteMonitors {
    config: VadConfig,
    monitors: HashMap<String, VoiceActivityMonitor>,
}

impl SiteMonitors {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            monitors: HashMap::new(),
        }
    }

    pub fn get(&self, site_id: &str) -> Option<&VoiceActivityMonitor> {
        self.monitors.get(site_id)
    }

    /// VAD messages for an inbound audio frame. Anything else yields nothing.
    pub fn feed(&mut self, message: &InboundMessage) -> Vec<InboundMessage> {
        let Some(site) = topics::audio_frame_site(&message.topic) else {
            return Vec::new();
        };
        let Some(frame) = router::audio_frame(&message.payload) else {
            return Vec::new();
        };
        if !self.monitors.contains_key(site) {
            match VoiceActivityMonitor::new(site, self.config.clone()) {
                Ok(monitor) => {
                    self.monitors.insert(site.to_string(), monitor);
                }
                Err(e) => {
                    warn!(site, error = %e, "VAD unavailable");
                    return Vec::new();
                }
            }
        }
        let Some(monitor) = self.monitors.get_mut(site) else {
            return Vec::new();
        };
        monitor.feed(&frame).unwrap_or_else(|e| {
            debug!(site, error = %e, "VAD skipped frame");
            Vec::new()
        })
    }

    /// Drop buffered audio and speaking state once the device's session is over.
    pub fn session_ended(&mut self, site_id: &str) {
        if let Some(monitor) = self.monitors.get_mut(site_id) {
            if let Err(e) = monitor.reset() {
                warn!(site_id, error = %e, "VAD reset failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_produces_no_edges() {
        let mut monitor = VoiceActivityMonitor::new("kitchen", VadConfig::default()).unwrap();
        // 1.5 chunks: one classified, the rest buffered.
        let out = monitor.feed(&AudioFrame::new(vec![0.0; 720], 16000)).unwrap();
        assert!(out.is_empty());
        assert_eq!(monitor.pending.len(), 240);
        assert!(!monitor.is_speaking());
    }

    #[test]
    fn mismatched_rate_is_rejected() {
        let mut monitor = VoiceActivityMonitor::new("kitchen", VadConfig::default()).unwrap();
        assert!(monitor.feed(&AudioFrame::new(vec![0.0; 480], 8000)).is_err());
    }

    fn frame_message(site: &str, samples: usize) -> InboundMessage {
        InboundMessage::new(
            format!("hermes/audioServer/{site}/audioFrame"),
            json!({"samples": vec![0.0f32; samples], "sampleRate": 16000}),
        )
    }

    #[test]
    fn site_monitors_are_created_per_device() {
        let mut sites = SiteMonitors::new(VadConfig::default());
        assert!(sites.feed(&frame_message("kitchen", 480)).is_empty());
        assert!(sites.feed(&InboundMessage::new(topics::VAD_UP, json!({"siteId": "den"}))).is_empty());
        assert!(sites.get("kitchen").is_some());
        assert!(sites.get("den").is_none());
    }

    #[test]
    fn ended_session_clears_buffered_audio() {
        let mut sites = SiteMonitors::new(VadConfig::default());
        sites.feed(&frame_message("kitchen", 720));
        assert_eq!(sites.get("kitchen").unwrap().pending.len(), 240);

        sites.session_ended("kitchen");
        let monitor = sites.get("kitchen").unwrap();
        assert!(monitor.pending.is_empty());
        assert!(!monitor.is_speaking());

        // Unknown devices are ignored.
        sites.session_ended("garage");
    }
}
