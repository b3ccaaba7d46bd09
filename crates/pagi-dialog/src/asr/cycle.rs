//! One bounded recognition pass for one session.

use super::recorder::{AudioFrame, Recorder};
use crate::bus::MessageBus;
use crate::error::DialogResult;
use crate::session::DialogSession;
use crate::timer::Timer;
use crate::topics;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared between the decode thread and the dispatch path.
///
/// The timeout timer starts with the cycle; when it fires capture stops and
/// the cycle counts as timed out. `end` stops capture and cancels the timer.
pub struct DecodeCycle {
    session_id: String,
    site_id: String,
    recorder: Arc<Recorder>,
    timer: Mutex<Option<Timer>>,
    timed_out: Arc<AtomicBool>,
    speaking: AtomicBool,
    ended: AtomicBool,
    started_at: Instant,
    bus: Arc<dyn MessageBus>,
}

impl DecodeCycle {
    pub fn begin(
        session: &DialogSession,
        timeout: Duration,
        bus: Arc<dyn MessageBus>,
    ) -> DialogResult<Arc<Self>> {
        let recorder = Arc::new(Recorder::new());
        recorder.start_recording();

        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = {
            let recorder = Arc::clone(&recorder);
            let timed_out = Arc::clone(&timed_out);
            let site = session.site_id().to_string();
            Timer::start(format!("asr_{}", session.site_id()), timeout, move || {
                timed_out.store(true, Ordering::SeqCst);
                recorder.stop_recording();
                warn!(site_id = %site, "ASR timed out");
            })?
        };

        Ok(Arc::new(Self {
            session_id: session.session_id().to_string(),
            site_id: session.site_id().to_string(),
            recorder,
            timer: Mutex::new(Some(timer)),
            timed_out,
            speaking: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            started_at: Instant::now(),
            bus,
        }))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.recorder.is_recording()
    }

    /// True between VAD up and VAD down.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Blocks the decode thread. `None` after VAD down, timeout or `end`.
    pub fn next_frame(&self) -> Option<AudioFrame> {
        if self.timed_out() {
            return None;
        }
        self.recorder.next_frame()
    }

    /// Frames still queued, without blocking.
    pub fn drain(&self) -> Vec<AudioFrame> {
        self.recorder.drain()
    }

    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        self.recorder.push(frame)
    }

    pub fn vad_up(&self) {
        self.speaking.store(true, Ordering::SeqCst);
    }

    /// End of utterance: stop capture so the engine finishes early.
    pub fn vad_down(&self) {
        self.speaking.store(false, Ordering::SeqCst);
        self.recorder.stop_recording();
    }

    pub fn stop_recording(&self) {
        self.recorder.stop_recording();
    }

    /// Progress notification for UIs.
    pub fn partial_text_captured(&self, text: &str, likelihood: f64) {
        debug!(site_id = %self.site_id, text, "Partial text");
        self.bus.publish(
            topics::PARTIAL_TEXT_CAPTURED,
            json!({
                "text": text,
                "likelihood": likelihood.clamp(0.0, 1.0),
                "seconds": self.elapsed().as_secs_f64(),
                "siteId": self.site_id,
                "sessionId": self.session_id,
            }),
        );
    }

    /// Stop capture and cancel the timeout. Only the first call does anything.
    pub fn end(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.recorder.stop_recording();
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
        true
    }
}

impl Drop for DecodeCycle {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::session::SessionStore;

    fn cycle(timeout: Duration) -> (Arc<DecodeCycle>, Arc<MemoryBus>) {
        let store = SessionStore::new();
        let session = store.create("kitchen", None);
        let bus = Arc::new(MemoryBus::new());
        (DecodeCycle::begin(&session, timeout, bus.clone()).unwrap(), bus)
    }

    #[test]
    fn vad_down_ends_capture_early() {
        let (cycle, _) = cycle(Duration::from_secs(30));
        cycle.vad_up();
        assert!(cycle.push_frame(AudioFrame::new(vec![0.2; 160], 16000)));
        cycle.vad_down();
        assert!(cycle.next_frame().is_some());
        assert!(cycle.next_frame().is_none());
        assert!(!cycle.timed_out());
        assert!(cycle.end());
        assert!(!cycle.end());
    }

    #[test]
    fn timeout_unblocks_reader() {
        let (cycle, _) = cycle(Duration::from_millis(50));
        let started = Instant::now();
        while cycle.next_frame().is_some() {}
        assert!(cycle.timed_out());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!cycle.is_capturing());
    }

    #[test]
    fn partials_are_published() {
        let (cycle, bus) = cycle(Duration::from_secs(30));
        cycle.partial_text_captured("turn on", 1.7);
        let msg = bus.on_topic(topics::PARTIAL_TEXT_CAPTURED).remove(0);
        assert_eq!(msg.payload["text"], "turn on");
        assert_eq!(msg.payload["likelihood"], 1.0);
        assert_eq!(msg.payload["siteId"], "kitchen");
        cycle.end();
    }
}
