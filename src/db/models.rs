//! Records persisted in the key/value store.
//!
//! Field names follow the JSON documents the dashboard reads and writes, so
//! the `type` field is renamed on every entity.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Light,
    SoilMoisture,
    Rainfall,
    Co2,
    Wind,
    WindSpeed,
    Pressure,
    Ph,
}

impl SensorType {
    pub const ALL: [SensorType; 10] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Light,
        SensorType::SoilMoisture,
        SensorType::Rainfall,
        SensorType::Co2,
        SensorType::Wind,
        SensorType::WindSpeed,
        SensorType::Pressure,
        SensorType::Ph,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Light => "light",
            SensorType::SoilMoisture => "soil_moisture",
            SensorType::Rainfall => "rainfall",
            SensorType::Co2 => "co2",
            SensorType::Wind => "wind",
            SensorType::WindSpeed => "wind_speed",
            SensorType::Pressure => "pressure",
            SensorType::Ph => "ph",
        }
    }

    /// Human-readable name used in alert messages.
    pub fn label(self) -> &'static str {
        match self {
            SensorType::Temperature => "Temperature",
            SensorType::Humidity => "Humidity",
            SensorType::Light => "Light",
            SensorType::SoilMoisture => "Soil moisture",
            SensorType::Rainfall => "Rainfall",
            SensorType::Co2 => "CO2",
            SensorType::Wind | SensorType::WindSpeed => "Wind speed",
            SensorType::Pressure => "Pressure",
            SensorType::Ph => "pH",
        }
    }

    pub fn default_unit(self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Humidity | SensorType::SoilMoisture => "%",
            SensorType::Light => "lux",
            SensorType::Rainfall => "mm",
            SensorType::Co2 => "ppm",
            SensorType::Wind => "km/h",
            SensorType::WindSpeed => "m/s",
            SensorType::Pressure => "hPa",
            SensorType::Ph => "pH",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sensor type: {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Sensor {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub location: String,
    pub status: SensorStatus,
    /// Topic this sensor publishes on. Preferred over (type, location) when
    /// matching push events.
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub last_reading: Option<Reading>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the bounded per-sensor reading history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReadingRecord {
    pub sensor_id: u64,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorType {
    Irrigation,
    Ventilation,
    Fan,
    Lighting,
    Heating,
    Cooling,
    Shading,
    Curtain,
    Nutrient,
    WaterPump,
    Humidifier,
}

impl ActuatorType {
    pub const ALL: [ActuatorType; 11] = [
        ActuatorType::Irrigation,
        ActuatorType::Ventilation,
        ActuatorType::Fan,
        ActuatorType::Lighting,
        ActuatorType::Heating,
        ActuatorType::Cooling,
        ActuatorType::Shading,
        ActuatorType::Curtain,
        ActuatorType::Nutrient,
        ActuatorType::WaterPump,
        ActuatorType::Humidifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActuatorType::Irrigation => "irrigation",
            ActuatorType::Ventilation => "ventilation",
            ActuatorType::Fan => "fan",
            ActuatorType::Lighting => "lighting",
            ActuatorType::Heating => "heating",
            ActuatorType::Cooling => "cooling",
            ActuatorType::Shading => "shading",
            ActuatorType::Curtain => "curtain",
            ActuatorType::Nutrient => "nutrient",
            ActuatorType::WaterPump => "water_pump",
            ActuatorType::Humidifier => "humidifier",
        }
    }

    /// States an actuator of this type may be switched to.
    pub fn allowed_states(self) -> &'static [&'static str] {
        match self {
            ActuatorType::Irrigation | ActuatorType::WaterPump => {
                &["on", "off", "low", "medium", "high"]
            }
            ActuatorType::Ventilation
            | ActuatorType::Fan
            | ActuatorType::Heating
            | ActuatorType::Cooling
            | ActuatorType::Nutrient => &["on", "off", "low", "medium", "high", "auto"],
            ActuatorType::Lighting => &["on", "off", "dim", "bright", "auto"],
            ActuatorType::Curtain | ActuatorType::Shading => &["open", "closed", "half", "auto"],
            ActuatorType::Humidifier => &["on", "off"],
        }
    }
}

impl fmt::Display for ActuatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActuatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActuatorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown actuator type: {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorMode {
    Manual,
    #[serde(alias = "automatic")]
    Auto,
}

/// Comparison used by automation rules and alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    /// Absolute change from the previous reading is at least the threshold.
    Change,
}

const EQ_TOLERANCE: f64 = 1e-6;

impl Condition {
    /// `previous` is only consulted by `Change`, which never holds without it.
    pub fn holds(self, value: f64, threshold: f64, previous: Option<f64>) -> bool {
        match self {
            Condition::Gt => value > threshold,
            Condition::Lt => value < threshold,
            Condition::Eq => (value - threshold).abs() < EQ_TOLERANCE,
            Condition::Gte => value >= threshold,
            Condition::Lte => value <= threshold,
            Condition::Change => previous.is_some_and(|p| (value - p).abs() >= threshold),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Condition::Gt => "greater than",
            Condition::Lt => "less than",
            Condition::Eq => "equal to",
            Condition::Gte => "greater than or equal to",
            Condition::Lte => "less than or equal to",
            Condition::Change => "changed by at least",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AutoRule {
    pub condition: Condition,
    pub threshold: f64,
    /// State to switch the actuator to when the condition holds.
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Actuator {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub actuator_type: ActuatorType,
    pub location: String,
    pub status: String,
    pub mode: ActuatorMode,
    pub is_active: bool,
    #[serde(default)]
    pub mqtt_topic: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Keyed by the sensor type the rule watches.
    #[serde(default)]
    pub auto_rules: BTreeMap<SensorType, AutoRule>,
    #[serde(default)]
    pub last_control_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Web,
    Auto,
    Device,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActuatorLog {
    pub id: u64,
    pub actuator_id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default)]
    pub previous_state: Option<String>,
    pub message: String,
    pub user: String,
    pub source: LogSource,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Whether the command reached the MQTT broker.
    pub delivered: bool,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertValues {
    pub value: f64,
    pub unit: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: u64,
    /// e.g. `temperature_high`, `soil_moisture_low`.
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub details: String,
    pub location: String,
    pub device: String,
    #[serde(default)]
    pub values: Option<AlertValues>,
    pub is_read: bool,
    pub is_acknowledged: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub threshold_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertThreshold {
    pub id: u64,
    pub sensor_type: SensorType,
    pub condition: Condition,
    pub threshold: f64,
    pub severity: Severity,
    #[serde(default)]
    pub notification_method: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlertPreferences {
    pub receive_email_notifications: bool,
    pub receive_sms_notifications: bool,
    pub email_address: String,
    pub phone_number: String,
    /// Stored alerts are not pushed to the event feed.
    pub mute_notifications: bool,
    /// Low-severity alerts are stored already read and acknowledged.
    pub auto_acknowledge_low_severity: bool,
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            receive_email_notifications: true,
            receive_sms_notifications: false,
            email_address: "user@example.com".to_owned(),
            phone_number: String::new(),
            mute_notifications: false,
            auto_acknowledge_low_severity: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
    Technician,
}

/// Stored user record. Never serialized to API clients; see `api::dto::UserDto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
