//! Recognition engine selection reacting to connectivity and operator settings.

mod common;

use common::{harness, message, wait_for_count};
use pagi_dialog::{topics, DialogConfig};
use serde_json::json;

fn listen_and_finish(h: &common::Harness, site: &str, queries: usize) {
    h.host
        .route(message(
            "hermes/hotword/default/detected",
            json!({"siteId": site}),
        ))
        .unwrap();
    h.host
        .route(message(topics::VAD_DOWN, json!({"siteId": site})))
        .unwrap();
    assert!(wait_for_count(&h.bus, topics::NLU_QUERY, queries));
}

#[test]
fn online_engine_active_when_connected() {
    let h = harness(common::config(), true);
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("cloud"));
    assert!(!h.host.asr().using_fallback());
}

#[test]
fn losing_internet_routes_next_decode_to_fallback() {
    let h = harness(common::config(), true);
    assert!(h.host.connectivity().record(false).unwrap());
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));
    assert!(h.host.asr().using_fallback());
    assert_eq!(h.cloud.stops(), 1);

    h.local.say("what time is it");
    listen_and_finish(&h, "office", 1);
    assert_eq!(h.local.decodes(), 1);
    assert_eq!(h.cloud.decodes(), 0);

    // Back online: the configured engine takes over again.
    assert!(h.host.connectivity().record(true).unwrap());
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("cloud"));
    assert!(!h.host.asr().using_fallback());
    assert_eq!(h.bus.on_topic("onInternetConnected").len(), 1);
}

#[test]
fn decode_in_flight_finishes_on_its_engine() {
    let h = harness(common::config(), true);
    h.cloud.say("play the news");
    h.host
        .route(message("hermes/hotword/default/detected", json!({"siteId": "bedroom"})))
        .unwrap();

    h.host.connectivity().record(false).unwrap();
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));
    // Still decoding, so the replaced engine is not stopped yet.
    assert_eq!(h.cloud.stops(), 0);

    h.host
        .route(message(topics::VAD_DOWN, json!({"siteId": "bedroom"})))
        .unwrap();
    assert!(wait_for_count(&h.bus, topics::NLU_QUERY, 1));
    assert_eq!(h.bus.on_topic(topics::NLU_QUERY)[0].payload["input"], "play the news");
    assert_eq!(h.cloud.decodes(), 1);
    assert_eq!(h.local.decodes(), 0);
    assert_eq!(h.cloud.stops(), 1);
}

#[test]
fn offline_pin_keeps_fallback_even_when_connected() {
    let config = DialogConfig {
        keep_asr_offline: true,
        ..common::config()
    };
    let h = harness(config, true);
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));

    h.host.connectivity().record(false).unwrap();
    h.host.connectivity().record(true).unwrap();
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));
}

#[test]
fn booting_offline_upgrades_once_connected() {
    let h = harness(common::config(), false);
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));
    assert!(!h.host.connectivity().is_online());

    assert!(h.host.connectivity().record(true).unwrap());
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("cloud"));
}

#[test]
fn staying_offline_ignores_reported_connectivity() {
    let config = DialogConfig {
        stay_completely_offline: true,
        ..common::config()
    };
    let h = harness(config, true);
    assert!(!h.host.connectivity().is_online());
    assert_eq!(h.host.asr().active_engine().as_deref(), Some("local"));
}

#[test]
fn sanitized_transcript_reaches_nlu() {
    let h = harness(common::config(), true);
    h.cloud.say("what is  2 + 2");
    listen_and_finish(&h, "lab", 1);
    assert_eq!(
        h.bus.on_topic(topics::NLU_QUERY)[0].payload["input"],
        "what is 2 plus 2"
    );
}
