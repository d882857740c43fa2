use chrono::Utc;
use tracing::{debug, info};

use super::{
    filter::{self, SensorFilter},
    input::{NewReading, NewSensor, SensorUpdate},
    next_id, push_targets, require_text, same_location, FarmStore,
};
use crate::{
    db::models::{Reading, ReadingRecord, Sensor, SensorStatus, SensorType},
    error::{FarmError, FarmResult},
};

/// A reading that was written to a stored sensor.
#[derive(Debug, Clone)]
pub struct AppliedReading {
    pub sensor: Sensor,
    /// Value of the reading it replaced.
    pub previous: Option<f64>,
}

/// Sets `last_reading` unless the stored one is strictly newer. Returns the
/// replaced value when the reading was applied.
fn apply_reading(sensor: &mut Sensor, reading: &Reading) -> Option<Option<f64>> {
    if let Some(last) = &sensor.last_reading {
        if reading.timestamp < last.timestamp {
            return None;
        }
    }
    let previous = sensor.last_reading.replace(reading.clone()).map(|r| r.value);
    sensor.status = SensorStatus::Active;
    sensor.updated_at = Utc::now();
    Some(previous)
}

fn record(sensor_id: u64, reading: &Reading) -> ReadingRecord {
    ReadingRecord {
        sensor_id,
        value: reading.value,
        unit: reading.unit.clone(),
        timestamp: reading.timestamp,
    }
}

impl FarmStore {
    pub async fn list_sensors(&self, filter: &SensorFilter) -> FarmResult<Vec<Sensor>> {
        let sensors: Vec<Sensor> = self.read().await?;
        Ok(filter::apply(&sensors, |s| filter.matches(s)))
    }

    pub async fn get_sensor(&self, id: u64) -> FarmResult<Sensor> {
        let sensors: Vec<Sensor> = self.read().await?;
        sensors
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| FarmError::not_found("Sensor", id))
    }

    pub async fn create_sensor(&self, input: NewSensor) -> FarmResult<Sensor> {
        let name = require_text("name", &input.name)?;
        let location = require_text("location", &input.location)?;
        let now = Utc::now();

        let sensor = self
            .mutate(|sensors: &mut Vec<Sensor>| {
                let sensor = Sensor {
                    id: next_id(sensors.iter().map(|s| s.id)),
                    name,
                    sensor_type: input.sensor_type,
                    location,
                    status: input.status.unwrap_or(SensorStatus::Active),
                    mqtt_topic: input.mqtt_topic,
                    model: input.model,
                    manufacturer: input.manufacturer,
                    last_reading: None,
                    created_at: now,
                    updated_at: now,
                };
                sensors.push(sensor.clone());
                Ok(sensor)
            })
            .await?;

        info!(sensor_id = sensor.id, sensor_type = %sensor.sensor_type, "Sensor created");
        Ok(sensor)
    }

    pub async fn update_sensor(&self, id: u64, update: SensorUpdate) -> FarmResult<Sensor> {
        let name = update.name.as_deref().map(|n| require_text("name", n)).transpose()?;
        let location = update
            .location
            .as_deref()
            .map(|l| require_text("location", l))
            .transpose()?;

        self.mutate(|sensors: &mut Vec<Sensor>| {
            let sensor = sensors
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| FarmError::not_found("Sensor", id))?;

            if let Some(name) = name {
                sensor.name = name;
            }
            if let Some(t) = update.sensor_type {
                sensor.sensor_type = t;
            }
            if let Some(location) = location {
                sensor.location = location;
            }
            if let Some(status) = update.status {
                sensor.status = status;
            }
            if update.mqtt_topic.is_some() {
                sensor.mqtt_topic = update.mqtt_topic;
            }
            if update.model.is_some() {
                sensor.model = update.model;
            }
            if update.manufacturer.is_some() {
                sensor.manufacturer = update.manufacturer;
            }
            sensor.updated_at = Utc::now();
            Ok(sensor.clone())
        })
        .await
    }

    pub async fn delete_sensor(&self, id: u64) -> FarmResult<()> {
        self.mutate(|sensors: &mut Vec<Sensor>| {
            let before = sensors.len();
            sensors.retain(|s| s.id != id);
            if sensors.len() == before {
                return Err(FarmError::not_found("Sensor", id));
            }
            Ok(())
        })
        .await?;
        // Ids are reused once the highest one is gone.
        let dropped = self
            .mutate(|history: &mut Vec<ReadingRecord>| {
                let before = history.len();
                history.retain(|r| r.sensor_id != id);
                Ok(before - history.len())
            })
            .await?;
        info!(sensor_id = id, dropped_readings = dropped, "Sensor deleted");
        Ok(())
    }

    /// Records a reading for one sensor. The reading always lands in the
    /// history; `last_reading` only moves forward in time.
    pub async fn add_reading(&self, id: u64, input: NewReading) -> FarmResult<ReadingRecord> {
        if !input.value.is_finite() {
            return Err(FarmError::validation("Reading value must be a finite number"));
        }

        let (sensor, reading, applied) = self
            .mutate(|sensors: &mut Vec<Sensor>| {
                let sensor = sensors
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| FarmError::not_found("Sensor", id))?;
                let reading = Reading {
                    value: input.value,
                    unit: input
                        .unit
                        .clone()
                        .unwrap_or_else(|| sensor.sensor_type.default_unit().to_owned()),
                    timestamp: input.timestamp.unwrap_or_else(Utc::now),
                };
                let applied = apply_reading(sensor, &reading);
                Ok((sensor.clone(), reading, applied))
            })
            .await?;

        let rec = record(id, &reading);
        self.append_history(vec![rec.clone()]).await?;

        match applied {
            Some(previous) => {
                self.evaluate_thresholds(&sensor, &reading, previous).await?;
            }
            None => debug!(sensor_id = id, "Older reading stored in history only"),
        }
        Ok(rec)
    }

    /// Applies a pushed reading to every sensor the topic addresses.
    pub async fn apply_pushed_reading(
        &self,
        topic: &str,
        sensor_type: SensorType,
        location: &str,
        reading: &Reading,
    ) -> FarmResult<Vec<AppliedReading>> {
        let applied = self
            .mutate(|sensors: &mut Vec<Sensor>| {
                let targets = push_targets(
                    sensors,
                    topic,
                    |s| s.mqtt_topic.as_deref(),
                    |s| s.sensor_type == sensor_type && same_location(&s.location, location),
                );
                let mut applied = Vec::new();
                for i in targets {
                    let sensor = &mut sensors[i];
                    match apply_reading(sensor, reading) {
                        Some(previous) => applied.push(AppliedReading {
                            sensor: sensor.clone(),
                            previous,
                        }),
                        None => debug!(sensor_id = sensor.id, "Ignoring reading older than stored"),
                    }
                }
                Ok(applied)
            })
            .await?;

        if applied.is_empty() {
            return Ok(applied);
        }

        self.append_history(applied.iter().map(|a| record(a.sensor.id, reading)).collect())
            .await?;
        for a in &applied {
            self.evaluate_thresholds(&a.sensor, reading, a.previous).await?;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::farm::test_support::{demo_store, empty_store};

    fn new_sensor(name: &str, t: SensorType, location: &str) -> NewSensor {
        NewSensor {
            name: name.into(),
            sensor_type: t,
            location: location.into(),
            status: None,
            mqtt_topic: None,
            model: None,
            manufacturer: None,
        }
    }

    fn reading_at(value: f64, ts: chrono::DateTime<Utc>) -> Reading {
        Reading {
            value,
            unit: "°C".into(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn create_assigns_incrementing_ids() {
        let store = empty_store();
        let a = store
            .create_sensor(new_sensor("A", SensorType::Temperature, "Field 1"))
            .await
            .unwrap();
        let b = store
            .create_sensor(new_sensor("B", SensorType::Humidity, "Field 1"))
            .await
            .unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.status, SensorStatus::Active);
    }

    #[tokio::test]
    async fn create_rejects_blank_name() {
        let store = empty_store();
        let err = store
            .create_sensor(new_sensor("  ", SensorType::Light, "Field 1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: name");
        assert!(store.list_sensors(&SensorFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_exactly_that_id() {
        let store = demo_store();
        store.delete_sensor(2).await.unwrap();

        let ids: Vec<u64> = store
            .list_sensors(&SensorFilter::default())
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn reused_id_starts_with_empty_history() {
        let store = demo_store();
        store
            .add_reading(
                4,
                NewReading {
                    value: 12.0,
                    unit: None,
                    timestamp: None,
                },
            )
            .await
            .unwrap();
        store.delete_sensor(4).await.unwrap();

        let sensor = store
            .create_sensor(new_sensor("CO2 Sensor", SensorType::Co2, "Field 9"))
            .await
            .unwrap();
        assert_eq!(sensor.id, 4);
        assert!(store.sensor_readings(4, None).await.unwrap().is_empty());
        let stats = store.sensor_stats("day", Some(SensorType::Co2)).await.unwrap();
        assert!(stats.stats.is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let store = demo_store();
        let err = store.delete_sensor(99).await.unwrap_err();
        assert!(matches!(err, FarmError::NotFound(_)));
        assert_eq!(err.to_string(), "Sensor with ID 99 not found");
        assert_eq!(store.list_sensors(&SensorFilter::default()).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let store = demo_store();
        let updated = store
            .update_sensor(
                3,
                SensorUpdate {
                    location: Some("Field 2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.location, "Field 2");
        assert_eq!(updated.name, "Light Sensor 1");
        assert_eq!(store.get_sensor(3).await.unwrap().location, "Field 2");
    }

    #[tokio::test]
    async fn pushed_reading_prefers_topic_match() {
        let store = demo_store();
        let now = Utc::now() + Duration::seconds(5);
        // Topic of sensor 1, but the location names a different greenhouse.
        let applied = store
            .apply_pushed_reading(
                "farm/sensors/temperature/1",
                SensorType::Temperature,
                "Greenhouse 9",
                &reading_at(26.0, now),
            )
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].sensor.id, 1);
        assert_eq!(applied[0].previous, Some(24.5));
    }

    #[tokio::test]
    async fn pushed_reading_falls_back_to_type_and_location() {
        let store = demo_store();
        let now = Utc::now() + Duration::seconds(5);
        let applied = store
            .apply_pushed_reading(
                "farm/sensors/soil_moisture/greenhouse_1",
                SensorType::SoilMoisture,
                "GREENHOUSE 1",
                &reading_at(35.0, now),
            )
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        let sensor = store.get_sensor(4).await.unwrap();
        assert_eq!(sensor.status, SensorStatus::Active);
        assert_eq!(sensor.last_reading.unwrap().value, 35.0);
    }

    #[tokio::test]
    async fn older_pushed_reading_does_not_overwrite_newer() {
        let store = demo_store();
        let stored = store.get_sensor(1).await.unwrap().last_reading.unwrap();

        let applied = store
            .apply_pushed_reading(
                "farm/sensors/temperature/1",
                SensorType::Temperature,
                "Greenhouse 1",
                &reading_at(99.0, stored.timestamp - Duration::seconds(1)),
            )
            .await
            .unwrap();
        assert!(applied.is_empty());
        assert_eq!(store.get_sensor(1).await.unwrap().last_reading.unwrap().value, 24.5);
    }

    #[tokio::test]
    async fn equal_timestamp_is_accepted() {
        let store = demo_store();
        let stored = store.get_sensor(1).await.unwrap().last_reading.unwrap();

        let applied = store
            .apply_pushed_reading(
                "farm/sensors/temperature/1",
                SensorType::Temperature,
                "Greenhouse 1",
                &reading_at(25.0, stored.timestamp),
            )
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
    }

    #[tokio::test]
    async fn add_reading_defaults_unit_and_appends_history() {
        let store = demo_store();
        let rec = store
            .add_reading(
                3,
                NewReading {
                    value: 4200.0,
                    unit: None,
                    timestamp: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(rec.unit, "lux");

        let history = store.sensor_readings(3, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 4200.0);
        assert_eq!(store.get_sensor(3).await.unwrap().last_reading.unwrap().value, 4200.0);
    }

    #[tokio::test]
    async fn backfilled_reading_keeps_newer_last_reading() {
        let store = demo_store();
        let stored = store.get_sensor(2).await.unwrap().last_reading.unwrap();
        store
            .add_reading(
                2,
                NewReading {
                    value: 10.0,
                    unit: None,
                    timestamp: Some(stored.timestamp - Duration::hours(2)),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get_sensor(2).await.unwrap().last_reading.unwrap().value, 65.0);
        assert_eq!(store.sensor_readings(2, None).await.unwrap().len(), 1);
    }
}
