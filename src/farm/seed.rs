//! Demo farm written to empty collections when `SEED_DEMO_DATA` is on.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use super::Collection;
use crate::{
    db::models::{
        Actuator, ActuatorLog, ActuatorMode, ActuatorType, Alert, AlertPreferences,
        AlertThreshold, AutoRule, Condition, Reading, ReadingRecord, Sensor, SensorStatus,
        SensorType, Severity, User,
    },
    store::{
        ACTUATORS_KEY, ACTUATOR_LOGS_KEY, ALERTS_KEY, ALERT_PREFERENCES_KEY, ALERT_THRESHOLDS_KEY,
        SENSORS_KEY, SENSOR_READINGS_KEY, USERS_KEY,
    },
};

impl Collection for Vec<Sensor> {
    const KEY: &'static str = SENSORS_KEY;

    fn demo() -> Self {
        demo_sensors()
    }
}

impl Collection for Vec<Actuator> {
    const KEY: &'static str = ACTUATORS_KEY;

    fn demo() -> Self {
        demo_actuators()
    }
}

impl Collection for Vec<AlertThreshold> {
    const KEY: &'static str = ALERT_THRESHOLDS_KEY;

    fn demo() -> Self {
        demo_thresholds()
    }
}

impl Collection for AlertPreferences {
    const KEY: &'static str = ALERT_PREFERENCES_KEY;
}

impl Collection for Vec<ActuatorLog> {
    const KEY: &'static str = ACTUATOR_LOGS_KEY;
}

impl Collection for Vec<Alert> {
    const KEY: &'static str = ALERTS_KEY;
}

impl Collection for Vec<User> {
    const KEY: &'static str = USERS_KEY;
}

impl Collection for Vec<ReadingRecord> {
    const KEY: &'static str = SENSOR_READINGS_KEY;
}

fn commissioned() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 10, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

fn last_serviced() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 11, 15, 10, 30, 0)
        .single()
        .unwrap_or_default()
}

fn sensor(
    id: u64,
    name: &str,
    sensor_type: SensorType,
    location: &str,
    status: SensorStatus,
    model: &str,
    reading: Reading,
) -> Sensor {
    Sensor {
        id,
        name: name.to_owned(),
        sensor_type,
        location: location.to_owned(),
        status,
        mqtt_topic: Some(format!("farm/sensors/{sensor_type}/1")),
        model: Some(model.to_owned()),
        manufacturer: Some("Acme Sensors".to_owned()),
        last_reading: Some(reading),
        created_at: commissioned(),
        updated_at: last_serviced(),
    }
}

fn reading(value: f64, unit: &str, timestamp: DateTime<Utc>) -> Reading {
    Reading {
        value,
        unit: unit.to_owned(),
        timestamp,
    }
}

pub fn demo_sensors() -> Vec<Sensor> {
    let now = Utc::now();
    vec![
        sensor(
            1,
            "Temperature Sensor 1",
            SensorType::Temperature,
            "Greenhouse 1",
            SensorStatus::Active,
            "DHT22",
            reading(24.5, "°C", now),
        ),
        sensor(
            2,
            "Humidity Sensor 1",
            SensorType::Humidity,
            "Greenhouse 1",
            SensorStatus::Active,
            "DHT22",
            reading(65.0, "%", now),
        ),
        sensor(
            3,
            "Light Sensor 1",
            SensorType::Light,
            "Greenhouse 2",
            SensorStatus::Active,
            "BH1750",
            reading(3500.0, "lux", now),
        ),
        sensor(
            4,
            "Soil Moisture Sensor 1",
            SensorType::SoilMoisture,
            "Greenhouse 1",
            SensorStatus::Inactive,
            "YL-69",
            reading(42.0, "%", now - Duration::hours(24)),
        ),
    ]
}

#[allow(clippy::too_many_arguments)]
fn actuator(
    id: u64,
    name: &str,
    actuator_type: ActuatorType,
    location: &str,
    status: &str,
    mode: ActuatorMode,
    is_active: bool,
    parameters: serde_json::Value,
    auto_rules: BTreeMap<SensorType, AutoRule>,
) -> Actuator {
    let parameters = match parameters {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };
    Actuator {
        id,
        name: name.to_owned(),
        actuator_type,
        location: location.to_owned(),
        status: status.to_owned(),
        mode,
        is_active,
        mqtt_topic: Some(format!("farm/actuators/{actuator_type}/1")),
        description: Some(format!("Main {} for {location}", actuator_type.as_str().replace('_', " "))),
        parameters,
        auto_rules,
        last_control_time: None,
        created_at: commissioned(),
        updated_at: last_serviced(),
    }
}

fn rule(sensor_type: SensorType, condition: Condition, threshold: f64, action: &str) -> (SensorType, AutoRule) {
    (
        sensor_type,
        AutoRule {
            condition,
            threshold,
            action: action.to_owned(),
        },
    )
}

pub fn demo_actuators() -> Vec<Actuator> {
    vec![
        actuator(
            1,
            "Greenhouse 1 Irrigation System",
            ActuatorType::Irrigation,
            "Greenhouse 1",
            "off",
            ActuatorMode::Manual,
            true,
            json!({ "water_flow": 2.5, "duration": 30, "schedule": "daily", "auto_threshold": 30 }),
            BTreeMap::from([rule(SensorType::SoilMoisture, Condition::Lt, 30.0, "on")]),
        ),
        actuator(
            2,
            "Greenhouse 2 Ventilation Fan",
            ActuatorType::Fan,
            "Greenhouse 2",
            "low",
            ActuatorMode::Auto,
            true,
            json!({ "speed": 2, "max_speed": 5, "direction": "forward", "auto_trigger_temp": 28 }),
            BTreeMap::from([rule(SensorType::Temperature, Condition::Gt, 28.0, "high")]),
        ),
        actuator(
            3,
            "Greenhouse 1 Lighting System",
            ActuatorType::Lighting,
            "Greenhouse 1",
            "on",
            ActuatorMode::Auto,
            true,
            json!({ "brightness": 80, "color_temp": 4000, "schedule_on": "06:00", "schedule_off": "20:00" }),
            BTreeMap::from([rule(SensorType::Light, Condition::Gt, 6000.0, "off")]),
        ),
        actuator(
            4,
            "Greenhouse 3 Humidifier",
            ActuatorType::Humidifier,
            "Greenhouse 3",
            "off",
            ActuatorMode::Manual,
            false,
            json!({ "capacity": 5, "auto_trigger_humidity": 40, "auto_stop_humidity": 60 }),
            BTreeMap::from([rule(SensorType::Humidity, Condition::Lt, 40.0, "on")]),
        ),
    ]
}

fn threshold(
    id: u64,
    sensor_type: SensorType,
    condition: Condition,
    value: f64,
    severity: Severity,
    methods: &[&str],
) -> AlertThreshold {
    AlertThreshold {
        id,
        sensor_type,
        condition,
        threshold: value,
        severity,
        notification_method: methods.iter().map(|m| (*m).to_owned()).collect(),
        is_active: true,
    }
}

pub fn demo_thresholds() -> Vec<AlertThreshold> {
    vec![
        threshold(1, SensorType::Temperature, Condition::Gt, 30.0, Severity::High, &["app", "email"]),
        threshold(2, SensorType::Temperature, Condition::Lt, 10.0, Severity::Medium, &["app"]),
        threshold(3, SensorType::Humidity, Condition::Gt, 85.0, Severity::Medium, &["app"]),
        threshold(4, SensorType::Humidity, Condition::Lt, 30.0, Severity::Medium, &["app", "email"]),
        threshold(
            5,
            SensorType::SoilMoisture,
            Condition::Lt,
            20.0,
            Severity::High,
            &["app", "email", "sms"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_ids_are_unique() {
        let ids: std::collections::BTreeSet<u64> = demo_sensors().iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 4);
        let ids: std::collections::BTreeSet<u64> = demo_actuators().iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn demo_actuator_states_are_allowed() {
        for a in demo_actuators() {
            assert!(
                a.actuator_type.allowed_states().contains(&a.status.as_str()),
                "{} has status {}",
                a.name,
                a.status
            );
            for rule in a.auto_rules.values() {
                assert!(a.actuator_type.allowed_states().contains(&rule.action.as_str()));
            }
        }
    }
}
