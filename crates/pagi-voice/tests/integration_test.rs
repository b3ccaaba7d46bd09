//! Integration tests: voice backends driving a dialog host.

use pagi_dialog::{topics, DialogConfig, DialogHost, EngineCatalog, InboundMessage, MemoryBus};
use pagi_voice::{PlaceholderAsr, VadConfig, VoiceActivityMonitor};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn offline_host(bus: Arc<MemoryBus>) -> DialogHost {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = DialogConfig {
        asr: "openrouter".to_string(),
        asr_fallback: PlaceholderAsr::NAME.to_string(),
        ..DialogConfig::default()
    };
    let catalog = EngineCatalog::new().with(Arc::new(PlaceholderAsr::with_response("what time is it")));
    let host = DialogHost::new(config, catalog, bus, false).expect("host");
    host.start().expect("start");
    host
}

#[test]
fn placeholder_transcript_reaches_nlu() {
    let bus = Arc::new(MemoryBus::new());
    let host = offline_host(bus.clone());
    assert_eq!(host.asr().active_engine().as_deref(), Some(PlaceholderAsr::NAME));

    host.route(InboundMessage::new(
        "hermes/hotword/default/detected",
        json!({"siteId": "kitchen"}),
    ))
    .unwrap();
    host.route(InboundMessage::new(
        "hermes/audioServer/kitchen/audioFrame",
        json!({"samples": vec![0.0f32; 480], "sampleRate": 16000}),
    ))
    .unwrap();
    host.route(InboundMessage::new(topics::VAD_DOWN, json!({"siteId": "kitchen"})))
        .unwrap();

    let query = bus
        .wait_for_topic(topics::NLU_QUERY, Duration::from_secs(5))
        .expect("nlu query");
    assert_eq!(query.payload["input"], "what time is it");
    assert_eq!(bus.on_topic(topics::PARTIAL_TEXT_CAPTURED).len(), 1);
}

#[test]
fn monitor_messages_route_to_the_host() {
    let bus = Arc::new(MemoryBus::new());
    let host = offline_host(bus);
    let mut monitor = VoiceActivityMonitor::new("den", VadConfig::default()).unwrap();

    // Silence never opens a speech edge, so nothing reaches the router.
    let frame = pagi_dialog::AudioFrame::new(vec![0.0; 4800], 16000);
    for message in monitor.feed(&frame).unwrap() {
        host.route(message).unwrap();
    }
    assert!(!monitor.is_speaking());
    assert!(host.store().is_empty());
}
