use std::fmt;

use crate::db::models::{ActuatorType, SensorType};

pub const SENSORS_FILTER: &str = "farm/sensors/#";
pub const ACTUATORS_FILTER: &str = "farm/actuators/#";

/// A parsed push topic. Locations use `_` for spaces on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarmTopic {
    Sensor {
        sensor_type: SensorType,
        location: String,
    },
    Actuator {
        actuator_type: ActuatorType,
        location: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised topic '{0}'")]
pub struct TopicError(pub String);

fn decode_location(segment: &str) -> String {
    segment.replace('_', " ")
}

fn encode_location(location: &str) -> String {
    location.trim().replace(' ', "_")
}

pub fn sensor_topic(sensor_type: SensorType, location: &str) -> String {
    format!("farm/sensors/{}/{}", sensor_type, encode_location(location))
}

pub fn actuator_topic(actuator_type: ActuatorType, location: &str) -> String {
    format!("farm/actuators/{}/{}", actuator_type, encode_location(location))
}

impl FarmTopic {
    pub fn parse(topic: &str) -> Result<Self, TopicError> {
        let err = || TopicError(topic.to_owned());
        let mut parts = topic.splitn(4, '/');
        let (Some("farm"), Some(kind), Some(ty), Some(location)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        if location.is_empty() {
            return Err(err());
        }
        let location = decode_location(location);
        match kind {
            "sensors" => Ok(FarmTopic::Sensor {
                sensor_type: ty.parse().map_err(|_| err())?,
                location,
            }),
            "actuators" => Ok(FarmTopic::Actuator {
                actuator_type: ty.parse().map_err(|_| err())?,
                location,
            }),
            _ => Err(err()),
        }
    }

    pub fn location(&self) -> &str {
        match self {
            FarmTopic::Sensor { location, .. } | FarmTopic::Actuator { location, .. } => location,
        }
    }
}

impl fmt::Display for FarmTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FarmTopic::Sensor {
                sensor_type,
                location,
            } => f.write_str(&sensor_topic(*sensor_type, location)),
            FarmTopic::Actuator {
                actuator_type,
                location,
            } => f.write_str(&actuator_topic(*actuator_type, location)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sensor_topic_with_underscored_location() {
        let t = FarmTopic::parse("farm/sensors/soil_moisture/Greenhouse_1").unwrap();
        assert_eq!(
            t,
            FarmTopic::Sensor {
                sensor_type: SensorType::SoilMoisture,
                location: "Greenhouse 1".into()
            }
        );
        assert_eq!(t.to_string(), "farm/sensors/soil_moisture/Greenhouse_1");
    }

    #[test]
    fn parses_actuator_topic() {
        let t = FarmTopic::parse("farm/actuators/water_pump/Field_A").unwrap();
        assert_eq!(t.location(), "Field A");
        assert!(matches!(
            t,
            FarmTopic::Actuator {
                actuator_type: ActuatorType::WaterPump,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_shapes() {
        for bad in [
            "farm/alerts",
            "farm/sensors/temperature",
            "farm/sensors/temperature/",
            "farm/sensors/plasma/Greenhouse_1",
            "home/sensors/temperature/x",
        ] {
            assert!(FarmTopic::parse(bad).is_err(), "{bad}");
        }
    }
}
