use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::topic::{ACTUATORS_FILTER, SENSORS_FILTER};
use crate::{config::MqttConfig, control::CommandSink, ingest::IngestService};

const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

/// Broker connection. Incoming farm topics go to the ingest service; device
/// commands go out through [`CommandSink`].
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
}

impl MqttBridge {
    /// Connects in the background and returns immediately.
    pub fn start(config: &MqttConfig, ingest: IngestService) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        let bridge = Self { client };

        let runner = bridge.clone();
        tokio::spawn(async move { runner.handle_events(eventloop, ingest).await });

        info!(
            broker = %format!("{}:{}", config.broker, config.port),
            client_id = %config.client_id,
            "MQTT bridge started"
        );
        bridge
    }

    async fn subscribe_all(&self) {
        for filter in [SENSORS_FILTER, ACTUATORS_FILTER] {
            if let Err(e) = self.client.subscribe(filter, QoS::AtLeastOnce).await {
                error!(filter, error = %e, "MQTT subscribe failed");
            }
        }
    }

    async fn handle_events(self, mut eventloop: EventLoop, ingest: IngestService) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected, subscribing to farm topics");
                    self.subscribe_all().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Err(e) = ingest.handle(&publish.topic, &publish.payload).await {
                        warn!(topic = %publish.topic, error = %e, "Push message rejected");
                    }
                }
                Ok(Event::Incoming(packet)) => {
                    debug!(?packet, "Received MQTT packet");
                }
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(RECONNECT_PAUSE).await;
                }
            }
        }
    }
}

#[async_trait]
impl CommandSink for MqttBridge {
    async fn publish(&self, topic: &str, payload: &Value) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, bytes)
            .await?;
        Ok(())
    }
}
