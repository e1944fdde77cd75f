use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tokio::time::Instant;

const PUBLISH_ATTEMPTS: u32 = 3;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One outgoing publish. `topic` is relative to the configured namespace.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    /// `messages` must be subscribed before anything is published, so
    /// nothing sent while the client is connecting is lost.
    pub async fn start(&self, messages: broadcast::Receiver<ChannelData>) -> Result<()> {
        let c = self.config.mqtt();

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("omnik-bridge", c.host(), c.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.receiver(client.clone(), eventloop),
            self.sender(client, messages)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
    }

    // drives the connection; nothing is subscribed to
    async fn receiver(&self, client: AsyncClient, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();
        // set once shutdown is requested, so the final publishes get flushed
        let mut stop_by: Option<Instant> = None;

        loop {
            tokio::select! {
                msg = shutdown.recv(), if stop_by.is_none() => {
                    if let Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) = msg {
                        stop_by = Some(Instant::now() + SHUTDOWN_GRACE);
                    }
                }

                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        // the broker may still hold our last will from a previous drop
                        if let Err(e) = client.try_publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online") {
                            warn!("failed to publish online status: {}", e);
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {} // keepalives etc
                    Err(e) => {
                        if stop_by.is_some() {
                            break;
                        }
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                },

                _ = tokio::time::sleep_until(stop_by.unwrap_or_else(Instant::now)), if stop_by.is_some() => {
                    warn!("mqtt did not disconnect cleanly");
                    break;
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // bridge -> mqtt
    async fn sender(
        &self,
        client: AsyncClient,
        mut receiver: broadcast::Receiver<ChannelData>,
    ) -> Result<()> {
        use ChannelData::*;

        loop {
            let message = match receiver.recv().await {
                Ok(Message(message)) => message,
                Ok(Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client
                        .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "offline")
                        .await;
                    let _ = client.disconnect().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, {} messages dropped", n);
                    continue;
                }
            };

            let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
            debug!("publishing: {} = {}", topic, message.payload);

            for attempt in 1..=PUBLISH_ATTEMPTS {
                match client
                    .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                    .await
                {
                    Ok(_) => break,
                    Err(err) => {
                        error!(
                            "MQTT publish failed: {:?} (attempt {}/{})",
                            err, attempt, PUBLISH_ATTEMPTS
                        );
                        if attempt < PUBLISH_ATTEMPTS {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
