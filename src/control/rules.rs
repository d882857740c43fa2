use std::collections::BTreeMap;

use crate::{
    db::models::{Actuator, ActuatorMode, SensorType},
    realtime::merge::LiveSensor,
};

/// An automation rule that fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub sensor_type: SensorType,
    pub action: String,
    pub value: f64,
}

/// First rule of `actuator` that holds against `readings` and would change
/// its status. Rules are tried in sensor-type order.
pub fn select_action(
    actuator: &Actuator,
    readings: &BTreeMap<SensorType, LiveSensor>,
) -> Option<Decision> {
    if !actuator.is_active || actuator.mode != ActuatorMode::Auto {
        return None;
    }
    actuator.auto_rules.iter().find_map(|(sensor_type, rule)| {
        let live = readings.get(sensor_type)?;
        let value = live.reading.value;
        let fires = rule.condition.holds(value, rule.threshold, live.previous)
            && !rule.action.eq_ignore_ascii_case(&actuator.status);
        fires.then(|| Decision {
            sensor_type: *sensor_type,
            action: rule.action.to_lowercase(),
            value,
        })
    })
}
