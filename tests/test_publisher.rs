mod common;
use common::*;

use omnik_bridge::bridge::{BridgeStats, Publisher};
use omnik_bridge::sensors::RecordingSink;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const REFRESH: Duration = Duration::from_secs(300);

fn publisher(enabled: &[Channel]) -> (Publisher, RecordingSink) {
    let sink = RecordingSink::new();
    let publisher = Publisher::new(
        enabled.iter().copied(),
        REFRESH,
        sink.clone().into(),
        Arc::new(Mutex::new(BridgeStats::default())),
    );
    (publisher, sink)
}

#[test]
fn disabled_channel_is_not_published() {
    common_setup();

    let enabled: Vec<Channel> = Channel::ALL
        .iter()
        .copied()
        .filter(|c| *c != Channel::Temperature)
        .collect();
    let (mut publisher, sink) = publisher(&enabled);

    publisher.publish_telemetry(&Factory::telemetry(), Instant::now());

    assert!(sink.values(Channel::Temperature).is_empty());
    assert_eq!(sink.values(Channel::Power), vec![SensorValue::Numeric(712.0)]);
}

#[test]
fn unchanged_values_wait_for_refresh() {
    common_setup();

    let (mut publisher, sink) = publisher(&Channel::ALL);
    let t0 = Instant::now();

    // 10 numeric channels, 2 text channels
    assert_eq!(publisher.publish_telemetry(&Factory::telemetry(), t0), 12);
    assert_eq!(publisher.publish_telemetry(&Factory::telemetry(), t0 + Duration::from_secs(10)), 0);

    // only numeric channels are refreshed
    assert_eq!(publisher.publish_telemetry(&Factory::telemetry(), t0 + REFRESH), 10);
    assert_eq!(sink.values(Channel::InverterId).len(), 1);
    assert_eq!(sink.values(Channel::Power).len(), 2);
}

#[test]
fn only_changed_values_are_published() {
    common_setup();

    let (mut publisher, sink) = publisher(&Channel::ALL);
    let t0 = Instant::now();

    publisher.publish_telemetry(&Factory::telemetry(), t0);
    sink.clear();

    let mut next = Factory::telemetry();
    next.power_ac1 = 650.0;
    next.inverter_id = "OTHER".to_string();

    assert_eq!(publisher.publish_telemetry(&next, t0 + Duration::from_secs(30)), 2);
    assert_eq!(
        sink.published(),
        vec![
            (Channel::Power, SensorValue::Numeric(650.0)),
            (Channel::InverterId, SensorValue::Text("OTHER".to_string())),
        ]
    );
}

#[test]
fn connectivity_publishes_transitions_only() {
    common_setup();

    let (mut publisher, sink) = publisher(&Channel::ALL);

    assert!(publisher.set_connected(false));
    assert!(!publisher.set_connected(false));
    assert!(publisher.set_connected(true));
    assert!(!publisher.set_connected(true));
    assert!(publisher.set_connected(false));

    assert_eq!(
        sink.values(Channel::Connected),
        vec![
            SensorValue::Binary(false),
            SensorValue::Binary(true),
            SensorValue::Binary(false),
        ]
    );
}

#[test]
fn connectivity_is_tracked_when_not_published() {
    common_setup();

    let (mut publisher, sink) = publisher(&[Channel::Power]);

    assert!(!publisher.set_connected(true));
    assert_eq!(publisher.connected(), Some(true));
    assert!(sink.published().is_empty());
}

#[test]
fn expiry_clears_live_measurements() {
    common_setup();

    let (mut publisher, sink) = publisher(&Channel::ALL);
    let t0 = Instant::now();

    publisher.publish_telemetry(&Factory::telemetry(), t0);
    sink.clear();

    publisher.mark_unavailable(t0 + Duration::from_secs(1800));

    assert_eq!(sink.values(Channel::Temperature), vec![SensorValue::Unavailable]);
    assert_eq!(sink.values(Channel::Power), vec![SensorValue::Numeric(0.0)]);
    assert_eq!(sink.values(Channel::CurrentAc1), vec![SensorValue::Numeric(0.0)]);
    assert!(sink.values(Channel::EnergyToday).is_empty());
    assert!(sink.values(Channel::EnergyTotal).is_empty());
    assert!(sink.values(Channel::OperatingHours).is_empty());

    // the next report restores them
    sink.clear();
    publisher.publish_telemetry(&Factory::telemetry(), t0 + Duration::from_secs(1900));
    assert_eq!(sink.values(Channel::Temperature), vec![SensorValue::Numeric(34.1)]);
    assert_eq!(sink.values(Channel::Power), vec![SensorValue::Numeric(712.0)]);
}

#[test]
fn payload_formatting() {
    common_setup();

    assert_eq!(
        SensorValue::numeric(Channel::AcFrequency, 50.0).payload(Channel::AcFrequency),
        "50.00"
    );
    assert_eq!(
        SensorValue::numeric(Channel::Power, 711.6).payload(Channel::Power),
        "712"
    );
    assert_eq!(
        SensorValue::numeric(Channel::EnergyToday, 12.345_6).payload(Channel::EnergyToday),
        "12.35"
    );
    assert_eq!(SensorValue::Binary(true).payload(Channel::Connected), "ON");
    assert_eq!(SensorValue::Unavailable.payload(Channel::Temperature), "unavailable");
}

#[test]
fn channel_ids_round_trip() {
    for channel in Channel::ALL {
        assert_eq!(Channel::from_str(channel.id()).unwrap(), channel);
    }
    assert!(Channel::from_str("humidity").is_err());
}
