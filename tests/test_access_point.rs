mod common;
use common::*;

use async_trait::async_trait;
use omnik_bridge::access_point::{ApSettings, Radio};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct MockRadio {
    calls: Arc<Mutex<Vec<String>>>,
    channel: Option<u8>,
    failing_starts: Arc<Mutex<u32>>,
}

impl MockRadio {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn reset(&mut self) -> Result<(), NetworkError> {
        self.log("reset".to_string());
        Ok(())
    }

    async fn current_channel(&mut self) -> Option<u8> {
        self.log("current_channel".to_string());
        self.channel
    }

    async fn configure_address(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        self.log(format!("address {}/{}", settings.ip, settings.prefix_len()));
        Ok(())
    }

    async fn start_ap(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        self.log(format!("start {} ch{}", settings.ssid, settings.channel));

        let mut failing = self.failing_starts.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(NetworkError::StartFailed {
                ssid: settings.ssid.clone(),
                reason: "radio busy".to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn brings_up_configured_network() {
    common_setup();

    let radio = MockRadio::default();
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));

    manager.start(&Factory::access_point()).await.unwrap();

    assert!(manager.is_started());
    assert_eq!(
        radio.calls(),
        vec!["reset", "address 192.168.4.1/24", "start omnik-test ch6"]
    );
}

#[tokio::test]
async fn auto_channel_follows_radio() {
    common_setup();

    let radio = MockRadio {
        channel: Some(11),
        ..Default::default()
    };
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));

    let mut ap = Factory::access_point();
    ap.channel = 0;
    manager.start(&ap).await.unwrap();

    assert_eq!(radio.calls().first().map(String::as_str), Some("current_channel"));
    assert_eq!(radio.calls().last().map(String::as_str), Some("start omnik-test ch11"));
}

#[tokio::test]
async fn auto_channel_falls_back() {
    common_setup();

    let radio = MockRadio::default();
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));

    let mut ap = Factory::access_point();
    ap.channel = 0;
    manager.start(&ap).await.unwrap();

    assert_eq!(radio.calls().last().map(String::as_str), Some("start omnik-test ch1"));
}

#[tokio::test]
async fn missing_credentials_touch_nothing() {
    common_setup();

    let radio = MockRadio::default();
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));

    let mut ap = Factory::access_point();
    ap.password = String::new();

    assert!(matches!(
        manager.start(&ap).await,
        Err(NetworkError::MissingCredentials)
    ));
    assert!(radio.calls().is_empty());
    assert!(!manager.is_started());
}

#[tokio::test]
async fn failed_start_is_rolled_back_and_retryable() {
    common_setup();

    let radio = MockRadio {
        failing_starts: Arc::new(Mutex::new(1)),
        ..Default::default()
    };
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));
    let ap = Factory::access_point();

    assert!(matches!(
        manager.start(&ap).await,
        Err(NetworkError::StartFailed { .. })
    ));
    assert!(!manager.is_started());
    assert_eq!(
        radio.calls(),
        vec!["reset", "address 192.168.4.1/24", "start omnik-test ch6", "reset"]
    );

    manager.start(&ap).await.unwrap();
    assert!(manager.is_started());
    assert_eq!(radio.calls().len(), 7);
    assert_eq!(radio.calls()[4..], ["reset", "address 192.168.4.1/24", "start omnik-test ch6"]);
}

#[tokio::test]
async fn started_access_point_is_left_alone() {
    common_setup();

    let radio = MockRadio::default();
    let mut manager = AccessPointManager::new(Box::new(radio.clone()));
    let ap = Factory::access_point();

    manager.start(&ap).await.unwrap();
    let calls = radio.calls().len();

    manager.start(&ap).await.unwrap();
    assert_eq!(radio.calls().len(), calls);
}

#[tokio::test]
async fn unmanaged_backend_checks_the_address() {
    common_setup();

    let mut ap = Factory::access_point();
    ap.ip = std::net::Ipv4Addr::LOCALHOST;
    let mut manager = AccessPointManager::from_config(&ap);
    manager.start(&ap).await.unwrap();

    // TEST-NET-1, never assigned locally
    let mut ap = Factory::access_point();
    ap.ip = std::net::Ipv4Addr::new(192, 0, 2, 1);
    let mut manager = AccessPointManager::from_config(&ap);
    assert!(matches!(
        manager.start(&ap).await,
        Err(NetworkError::AddressConfig { .. })
    ));
}
