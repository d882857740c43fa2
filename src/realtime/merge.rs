//! Latest pushed value per `type_location`, and the payload shapes devices
//! publish.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::{
    db::models::{ActuatorMode, ActuatorType, Reading, SensorType},
    farm::actuators::DeviceState,
};

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unparseable timestamp '{0}'")]
    Timestamp(String),
}

/// Devices send either unix seconds or a date string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Seconds(f64),
    Text(String),
}

impl WireTimestamp {
    pub fn resolve(&self) -> Result<DateTime<Utc>, PayloadError> {
        match self {
            WireTimestamp::Seconds(secs) => {
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| PayloadError::Timestamp(secs.to_string()))
            }
            WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|t| t.and_utc())
                })
                .map_err(|_| PayloadError::Timestamp(s.clone())),
        }
    }
}

fn resolve(ts: &Option<WireTimestamp>) -> Result<DateTime<Utc>, PayloadError> {
    ts.as_ref().map_or_else(|| Ok(Utc::now()), WireTimestamp::resolve)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorPayload {
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    /// Overrides the location taken from the topic.
    #[serde(default)]
    pub location: Option<String>,
}

impl SensorPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn reading(&self, sensor_type: SensorType) -> Result<Reading, PayloadError> {
        Ok(Reading {
            value: self.value,
            unit: self
                .unit
                .clone()
                .unwrap_or_else(|| sensor_type.default_unit().to_owned()),
            timestamp: resolve(&self.timestamp)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorPayload {
    pub state: String,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub mode: Option<ActuatorMode>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ActuatorPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, PayloadError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn device_state(&self) -> Result<DeviceState, PayloadError> {
        Ok(DeviceState {
            state: self.state.trim().to_lowercase(),
            timestamp: resolve(&self.timestamp)?,
            mode: self.mode,
            params: self.params.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LiveSensor {
    pub sensor_type: SensorType,
    pub location: String,
    pub topic: String,
    pub reading: Reading,
    /// Value this reading replaced.
    pub previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LiveActuator {
    pub actuator_type: ActuatorType,
    pub location: String,
    pub topic: String,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct LiveSnapshot {
    pub sensors: BTreeMap<String, LiveSensor>,
    pub actuators: BTreeMap<String, LiveActuator>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeOutcome {
    /// Stored. Carries the value that was replaced, if any.
    Accepted { previous: Option<f64> },
    /// Strictly older than what is held.
    Stale,
}

pub fn live_key(kind: &str, location: &str) -> String {
    format!("{}_{}", kind, location.trim().to_lowercase())
}

/// Shared latest-value maps fed by the push channel.
#[derive(Clone, Default)]
pub struct LiveState {
    sensors: Arc<RwLock<HashMap<String, LiveSensor>>>,
    actuators: Arc<RwLock<HashMap<String, LiveActuator>>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn merge_sensor(
        &self,
        topic: &str,
        sensor_type: SensorType,
        location: &str,
        reading: Reading,
    ) -> MergeOutcome {
        let key = live_key(sensor_type.as_str(), location);
        let mut sensors = self.sensors.write().await;
        let previous = match sensors.get(&key) {
            Some(held) if reading.timestamp < held.reading.timestamp => return MergeOutcome::Stale,
            Some(held) => Some(held.reading.value),
            None => None,
        };
        sensors.insert(
            key,
            LiveSensor {
                sensor_type,
                location: location.trim().to_owned(),
                topic: topic.to_owned(),
                reading,
                previous,
            },
        );
        MergeOutcome::Accepted { previous }
    }

    pub async fn merge_actuator(
        &self,
        topic: &str,
        actuator_type: ActuatorType,
        location: &str,
        state: DeviceState,
    ) -> MergeOutcome {
        let key = live_key(actuator_type.as_str(), location);
        let mut actuators = self.actuators.write().await;
        if actuators
            .get(&key)
            .is_some_and(|held| state.timestamp < held.state.timestamp)
        {
            return MergeOutcome::Stale;
        }
        actuators.insert(
            key,
            LiveActuator {
                actuator_type,
                location: location.trim().to_owned(),
                topic: topic.to_owned(),
                state,
            },
        );
        MergeOutcome::Accepted { previous: None }
    }

    pub async fn sensor(&self, sensor_type: SensorType, location: &str) -> Option<LiveSensor> {
        self.sensors
            .read()
            .await
            .get(&live_key(sensor_type.as_str(), location))
            .cloned()
    }

    pub async fn actuator(&self, actuator_type: ActuatorType, location: &str) -> Option<LiveActuator> {
        self.actuators
            .read()
            .await
            .get(&live_key(actuator_type.as_str(), location))
            .cloned()
    }

    /// Puts `held` back unless the entry written at `written` has already
    /// been replaced by a later update.
    pub async fn revert_sensor(
        &self,
        sensor_type: SensorType,
        location: &str,
        written: DateTime<Utc>,
        held: Option<LiveSensor>,
    ) {
        let key = live_key(sensor_type.as_str(), location);
        let mut sensors = self.sensors.write().await;
        if sensors.get(&key).is_some_and(|s| s.reading.timestamp != written) {
            return;
        }
        match held {
            Some(h) => sensors.insert(key, h),
            None => sensors.remove(&key),
        };
    }

    pub async fn revert_actuator(
        &self,
        actuator_type: ActuatorType,
        location: &str,
        written: DateTime<Utc>,
        held: Option<LiveActuator>,
    ) {
        let key = live_key(actuator_type.as_str(), location);
        let mut actuators = self.actuators.write().await;
        if actuators.get(&key).is_some_and(|a| a.state.timestamp != written) {
            return;
        }
        match held {
            Some(h) => actuators.insert(key, h),
            None => actuators.remove(&key),
        };
    }

    pub async fn snapshot(&self) -> LiveSnapshot {
        let sensors = self.sensors.read().await;
        let actuators = self.actuators.read().await;
        LiveSnapshot {
            sensors: sensors.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            actuators: actuators.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}
