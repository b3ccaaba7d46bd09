//! Per-utterance audio buffer fed by the audio server and drained by the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// One chunk of mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// 16-bit little-endian PCM, as sent by the audio server.
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        Self::new(samples, sample_rate)
    }
}

#[derive(Debug)]
pub enum RecorderSignal {
    Frame(AudioFrame),
    Stop,
}

/// Frames pushed while recording are handed to the decode thread in order.
/// `stop` unblocks a waiting reader and is safe to call repeatedly.
pub struct Recorder {
    tx: mpsc::UnboundedSender<RecorderSignal>,
    rx: Mutex<mpsc::UnboundedReceiver<RecorderSignal>>,
    recording: AtomicBool,
}

impl Recorder {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            recording: AtomicBool::new(false),
        }
    }

    pub fn start_recording(&self) {
        self.recording.store(true, Ordering::SeqCst);
    }

    pub fn stop_recording(&self) {
        if self.recording.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(RecorderSignal::Stop);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Frames arriving after the recorder stopped are dropped.
    pub fn push(&self, frame: AudioFrame) -> bool {
        if !self.is_recording() {
            return false;
        }
        self.tx.send(RecorderSignal::Frame(frame)).is_ok()
    }

    /// Block until the next frame. `None` once recording stopped.
    ///
    /// Must be called from a plain thread, never from inside a tokio runtime.
    pub fn next_frame(&self) -> Option<AudioFrame> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_recording() {
            // Stopped: hand out what is left, never wait.
            return match rx.try_recv() {
                Ok(RecorderSignal::Frame(frame)) => Some(frame),
                _ => None,
            };
        }
        match rx.blocking_recv()? {
            RecorderSignal::Frame(frame) => Some(frame),
            RecorderSignal::Stop => None,
        }
    }

    /// Everything buffered right now, without blocking.
    pub fn drain(&self) -> Vec<AudioFrame> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frames = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            match signal {
                RecorderSignal::Frame(frame) => frames.push(frame),
                RecorderSignal::Stop => break,
            }
        }
        frames
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_before_start_are_dropped() {
        let recorder = Recorder::new();
        assert!(!recorder.push(AudioFrame::new(vec![0.0; 4], 16000)));
        recorder.start_recording();
        assert!(recorder.push(AudioFrame::new(vec![0.1; 4], 16000)));
        recorder.stop_recording();
        recorder.stop_recording();
        assert_eq!(recorder.next_frame().map(|f| f.samples.len()), Some(4));
        assert!(recorder.next_frame().is_none());
    }

    #[test]
    fn pcm16_decoding() {
        let frame = AudioFrame::from_pcm16(&[0x00, 0x40, 0x00, 0xC0, 0x01], 16000);
        assert_eq!(frame.samples, vec![0.5, -0.5]);
    }
}
