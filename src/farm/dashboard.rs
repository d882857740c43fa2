use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::FarmStore;
use crate::{
    db::models::{Actuator, ActuatorType, Alert, Reading, Sensor, SensorStatus, SensorType},
    error::FarmResult,
};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LatestReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub sensor_id: u64,
    pub sensor_name: String,
    pub sensor_location: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SensorSummary {
    pub total: usize,
    pub active: usize,
    pub latest_readings: BTreeMap<SensorType, LatestReading>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct StatusCounts {
    pub total: usize,
    pub on: usize,
    pub off: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActuatorSummary {
    pub total: usize,
    pub active: usize,
    pub statuses: BTreeMap<String, StatusCounts>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DashboardSummary {
    pub sensors: SensorSummary,
    pub actuators: ActuatorSummary,
    pub unread_alerts: usize,
    pub timestamp: DateTime<Utc>,
}

fn summarize_sensors(sensors: &[Sensor]) -> SensorSummary {
    let mut latest: BTreeMap<SensorType, LatestReading> = BTreeMap::new();
    for s in sensors {
        let Some(reading) = &s.last_reading else {
            continue;
        };
        let newer = latest
            .get(&s.sensor_type)
            .is_none_or(|held| reading.timestamp > held.reading.timestamp);
        if newer {
            latest.insert(
                s.sensor_type,
                LatestReading {
                    reading: reading.clone(),
                    sensor_id: s.id,
                    sensor_name: s.name.clone(),
                    sensor_location: s.location.clone(),
                },
            );
        }
    }
    SensorSummary {
        total: sensors.len(),
        active: sensors.iter().filter(|s| s.status == SensorStatus::Active).count(),
        latest_readings: latest,
    }
}

fn summarize_actuators(actuators: &[Actuator]) -> ActuatorSummary {
    let mut statuses: BTreeMap<ActuatorType, StatusCounts> = BTreeMap::new();
    for a in actuators {
        let counts = statuses.entry(a.actuator_type).or_default();
        counts.total += 1;
        match a.status.as_str() {
            "off" | "closed" => counts.off += 1,
            "error" => counts.error += 1,
            _ => counts.on += 1,
        }
    }
    ActuatorSummary {
        total: actuators.len(),
        active: actuators.iter().filter(|a| a.is_active).count(),
        statuses: statuses
            .into_iter()
            .map(|(t, c)| (t.as_str().to_owned(), c))
            .collect(),
    }
}

impl FarmStore {
    pub async fn dashboard_summary(&self) -> FarmResult<DashboardSummary> {
        let sensors: Vec<Sensor> = self.read().await?;
        let actuators: Vec<Actuator> = self.read().await?;
        let alerts: Vec<Alert> = self.read().await?;

        Ok(DashboardSummary {
            sensors: summarize_sensors(&sensors),
            actuators: summarize_actuators(&actuators),
            unread_alerts: alerts.iter().filter(|a| !a.is_read).count(),
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::farm::{
        input::NewReading,
        seed::{demo_actuators, demo_sensors},
        test_support::demo_store,
    };

    #[test]
    fn newest_reading_per_type_wins() {
        let mut sensors = demo_sensors();
        let mut twin = sensors[0].clone();
        twin.id = 99;
        twin.name = "Backup thermometer".into();
        if let Some(r) = twin.last_reading.as_mut() {
            r.timestamp += Duration::minutes(1);
            r.value = 19.0;
        }
        sensors.push(twin);

        let summary = summarize_sensors(&sensors);
        assert_eq!(summary.total, 5);
        let temp = &summary.latest_readings[&SensorType::Temperature];
        assert_eq!(temp.sensor_id, 99);
        assert_eq!(temp.reading.value, 19.0);
    }

    #[test]
    fn actuator_statuses_are_counted_per_type() {
        let mut actuators = demo_actuators();
        actuators[0].status = "error".into();
        let summary = summarize_actuators(&actuators);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.active, 3);
        assert_eq!(
            summary.statuses["irrigation"],
            StatusCounts {
                total: 1,
                on: 0,
                off: 0,
                error: 1
            }
        );
        assert_eq!(summary.statuses["fan"].on, 1);
        assert_eq!(summary.statuses["humidifier"].off, 1);
    }

    #[tokio::test]
    async fn summary_reflects_store() {
        let store = demo_store();
        store
            .add_reading(
                1,
                NewReading {
                    value: 50.0,
                    unit: None,
                    timestamp: None,
                },
            )
            .await
            .unwrap();

        let summary = store.dashboard_summary().await.unwrap();
        assert_eq!(summary.sensors.total, 4);
        assert_eq!(summary.sensors.active, 3);
        assert_eq!(
            summary.sensors.latest_readings[&SensorType::Temperature].reading.value,
            50.0
        );
        // 50 °C crosses the seeded high-temperature threshold.
        assert!(summary.unread_alerts >= 1);
    }
}
