//! Query filters. A `None` field matches everything; filtering never
//! reorders the collection.

use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::db::models::{
    Actuator, ActuatorMode, ActuatorType, Alert, Sensor, SensorStatus, SensorType, Severity,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SensorFilter {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<SensorType>,
    /// Case-insensitive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SensorStatus>,
}

impl SensorFilter {
    pub fn matches(&self, s: &Sensor) -> bool {
        self.sensor_type.is_none_or(|t| s.sensor_type == t)
            && location_matches(self.location.as_deref(), &s.location)
            && self.status.is_none_or(|st| s.status == st)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ActuatorFilter {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub actuator_type: Option<ActuatorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ActuatorMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl ActuatorFilter {
    pub fn matches(&self, a: &Actuator) -> bool {
        self.actuator_type.is_none_or(|t| a.actuator_type == t)
            && location_matches(self.location.as_deref(), &a.location)
            && self
                .status
                .as_deref()
                .is_none_or(|st| a.status.eq_ignore_ascii_case(st))
            && self.mode.is_none_or(|m| a.mode == m)
            && self.is_active.is_none_or(|v| a.is_active == v)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AlertFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_acknowledged: Option<bool>,
}

impl AlertFilter {
    pub fn matches(&self, a: &Alert) -> bool {
        self.severity.is_none_or(|s| a.severity == s)
            && self.alert_type.as_deref().is_none_or(|t| a.alert_type == t)
            && location_matches(self.location.as_deref(), &a.location)
            && self.is_read.is_none_or(|v| a.is_read == v)
            && self.is_acknowledged.is_none_or(|v| a.is_acknowledged == v)
    }
}

fn location_matches(wanted: Option<&str>, actual: &str) -> bool {
    wanted.is_none_or(|w| w.trim().eq_ignore_ascii_case(actual.trim()))
}

/// Keeps the matching items in their original order.
pub fn apply<T: Clone>(items: &[T], keep: impl Fn(&T) -> bool) -> Vec<T> {
    items.iter().filter(|i| keep(i)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Sensor;

    fn sensors() -> Vec<Sensor> {
        crate::farm::seed::demo_sensors()
    }

    #[test]
    fn empty_filter_returns_everything_in_order() {
        let all = sensors();
        let got = apply(&all, |s| SensorFilter::default().matches(s));
        assert_eq!(got, all);
    }

    #[test]
    fn location_filter_is_case_insensitive_and_order_preserving() {
        let all = sensors();
        let filter = SensorFilter {
            location: Some("greenhouse 1".into()),
            ..Default::default()
        };
        let got = apply(&all, |s| filter.matches(s));
        let ids: Vec<u64> = got.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn combined_filters_intersect() {
        let all = sensors();
        let filter = SensorFilter {
            location: Some("Greenhouse 1".into()),
            status: Some(SensorStatus::Active),
            ..Default::default()
        };
        let ids: Vec<u64> = apply(&all, |s| filter.matches(s)).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn actuator_status_filter_ignores_case() {
        let all = crate::farm::seed::demo_actuators();
        let filter = ActuatorFilter {
            status: Some("OFF".into()),
            ..Default::default()
        };
        let ids: Vec<u64> = apply(&all, |a| filter.matches(a)).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn filter_deserializes_type_param() {
        let f: SensorFilter =
            serde_json::from_value(serde_json::json!({ "type": "humidity" })).unwrap();
        assert_eq!(f.sensor_type, Some(SensorType::Humidity));
    }
}
