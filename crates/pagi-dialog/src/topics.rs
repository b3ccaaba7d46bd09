//! Bus topics consumed and produced by the dialog host.

pub const HOTWORD_DETECTED: &str = "hermes/hotword/default/detected";
pub const START_SESSION: &str = "hermes/dialogueManager/startSession";
pub const CONTINUE_SESSION: &str = "hermes/dialogueManager/continueSession";
pub const END_SESSION: &str = "hermes/dialogueManager/endSession";
pub const SESSION_STARTED: &str = "hermes/dialogueManager/sessionStarted";
pub const SESSION_ENDED: &str = "hermes/dialogueManager/sessionEnded";

pub const START_LISTENING: &str = "hermes/asr/startListening";
pub const STOP_LISTENING: &str = "hermes/asr/stopListening";
pub const TEXT_CAPTURED: &str = "hermes/asr/textCaptured";
pub const PARTIAL_TEXT_CAPTURED: &str = "hermes/asr/partialTextCaptured";
pub const AUDIO_FRAME_PREFIX: &str = "hermes/audioServer/";

pub const VAD_UP: &str = "hermes/voiceActivity/vadUp";
pub const VAD_DOWN: &str = "hermes/voiceActivity/vadDown";

pub const NLU_QUERY: &str = "hermes/nlu/query";
pub const INTENT_NOT_RECOGNIZED: &str = "hermes/nlu/intentNotRecognized";
pub const NLU_ERROR: &str = "hermes/nlu/error";
pub const INTENT_PREFIX: &str = "hermes/intent/";

pub const PLAY_SOUND: &str = "hermes/audioServer/playSound";

/// Hotword topics carry the model id in the middle segment.
pub fn is_hotword(topic: &str) -> bool {
    topic.starts_with("hermes/hotword/") && topic.ends_with("/detected")
}

pub fn is_audio_frame(topic: &str) -> bool {
    topic.starts_with(AUDIO_FRAME_PREFIX) && topic.ends_with("/audioFrame")
}

/// `hermes/audioServer/<site>/audioFrame` -> `<site>`
pub fn audio_frame_site(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(AUDIO_FRAME_PREFIX)?
        .strip_suffix("/audioFrame")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotword_and_audio_topics() {
        assert!(is_hotword("hermes/hotword/hey_pagi/detected"));
        assert!(!is_hotword(START_SESSION));
        assert!(is_audio_frame("hermes/audioServer/kitchen/audioFrame"));
        assert_eq!(audio_frame_site("hermes/audioServer/kitchen/audioFrame"), Some("kitchen"));
        assert_eq!(audio_frame_site(PLAY_SOUND), None);
    }
}
