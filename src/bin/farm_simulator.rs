//! Publishes simulated greenhouse readings and actuator states to MQTT.
//!
//! Usage:
//!   cargo run --bin farm_simulator -- --broker localhost --port 1883 --interval 5

use std::{env, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smart_farm_service::{
    db::models::{ActuatorType, SensorType},
    realtime::topic::{actuator_topic, sensor_topic},
};

const LOCATIONS: [&str; 2] = ["Greenhouse 1", "Greenhouse 2"];

const SENSORS: [(SensorType, f64, f64); 5] = [
    (SensorType::Temperature, 15.0, 35.0),
    (SensorType::Humidity, 30.0, 90.0),
    (SensorType::Light, 0.0, 10_000.0),
    (SensorType::SoilMoisture, 10.0, 80.0),
    (SensorType::Co2, 350.0, 1_500.0),
];

const ACTUATORS: [ActuatorType; 3] = [
    ActuatorType::Irrigation,
    ActuatorType::Ventilation,
    ActuatorType::Lighting,
];

fn arg(args: &[String], name: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == name).map(|w| w[1].clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let broker = arg(&args, "--broker").unwrap_or_else(|| "localhost".into());
    let port: u16 = arg(&args, "--port")
        .unwrap_or_else(|| "1883".into())
        .parse()
        .context("--port must be a valid port number")?;
    let interval: u64 = arg(&args, "--interval")
        .unwrap_or_else(|| "5".into())
        .parse()
        .context("--interval must be a number of seconds")?;

    let mut options = MqttOptions::new("farm_simulator", &broker, port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 64);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!(error = %e, "MQTT connection error");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    });

    info!(broker = %format!("{broker}:{port}"), interval_secs = interval, "Simulator started");
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        ticker.tick().await;
        publish_round(&client).await;
    }
}

async fn publish_round(client: &AsyncClient) {
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
    let mut messages = Vec::new();
    {
        let mut rng = rand::thread_rng();
        for location in LOCATIONS {
            for (sensor_type, low, high) in SENSORS {
                let value = (rng.gen_range(low..high) * 10.0).round() / 10.0;
                let payload = json!({
                    "value": value,
                    "unit": sensor_type.default_unit(),
                    "timestamp": now,
                    "location": location,
                });
                messages.push((sensor_topic(sensor_type, location), payload));
            }
            for actuator_type in ACTUATORS {
                let state = if rng.gen_bool(0.5) { "on" } else { "off" };
                let payload = json!({
                    "state": state,
                    "timestamp": now,
                    "location": location,
                });
                messages.push((actuator_topic(actuator_type, location), payload));
            }
        }
    }

    for (topic, payload) in messages {
        if let Err(e) = client
            .publish(&topic, QoS::AtLeastOnce, false, payload.to_string())
            .await
        {
            error!(topic = %topic, error = %e, "Publish failed");
        }
    }
    info!("Published simulated readings");
}
