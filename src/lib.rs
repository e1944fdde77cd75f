pub mod access_point;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod omnik;
pub mod options;
pub mod prelude;
pub mod sensors;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::mqtt::Mqtt;
use crate::sensors::{LogSink, MqttSink};

/// Brings the access point up, then serves the datalogger until `shutdown_rx`
/// fires. Startup failures (access point, listener) are returned as-is.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: ConfigWrapper) -> Result<()> {
    info!("omnik-bridge {} starting", CARGO_PKG_VERSION);

    let mut access_point = AccessPointManager::from_config(config.access_point());
    access_point.start(config.access_point()).await?;

    let channels = Channels::new();

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mut mqtt_handle = None;
    let sink: Sink = if config.mqtt().enabled() {
        let messages = channels.to_mqtt.subscribe();
        let mqtt = mqtt.clone();
        mqtt_handle = Some(tokio::spawn(async move {
            if let Err(e) = mqtt.start(messages).await {
                error!("MQTT task failed: {}", e);
            }
        }));
        MqttSink::new(channels.clone()).into()
    } else {
        LogSink.into()
    };

    let bridge = Bridge::new(config.clone(), channels.clone(), sink);
    let stats = bridge.stats();
    let listener = bridge.bind().await?;

    let result = bridge.run(listener, shutdown_rx).await;

    if let Some(handle) = mqtt_handle {
        mqtt.stop();
        if let Err(e) = handle.await {
            error!("Error waiting for MQTT task: {}", e);
        }
    }

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("Application shutdown complete");
    result
}
