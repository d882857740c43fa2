use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

use super::{
    filter::{self, ActuatorFilter},
    input::{ActuatorUpdate, NewActuator},
    next_id, push_targets, require_text, same_location, FarmStore,
};
use crate::{
    db::models::{
        Actuator, ActuatorLog, ActuatorMode, ActuatorType, AutoRule, LogSource, SensorType,
    },
    error::{FarmError, FarmResult},
};

/// Oldest entries are dropped past this many.
const MAX_ACTUATOR_LOGS: usize = 1000;

/// Lower-cases `action` and checks it against the type's allowed states.
pub fn normalize_action(actuator_type: ActuatorType, action: &str) -> FarmResult<String> {
    let action = action.trim().to_lowercase();
    if action.is_empty() {
        return Err(FarmError::validation("Missing required field: action"));
    }
    let allowed = actuator_type.allowed_states();
    if !allowed.contains(&action.as_str()) {
        return Err(FarmError::validation(format!(
            "Invalid action '{action}' for {actuator_type} actuator. Allowed: {}",
            allowed.join(", ")
        )));
    }
    Ok(action)
}

/// Checks the actuator can be driven to `action`; returns the normalized
/// action.
pub fn check_controllable(actuator: &Actuator, action: &str) -> FarmResult<String> {
    if !actuator.is_active {
        return Err(FarmError::Conflict(format!(
            "Actuator {} is not active",
            actuator.id
        )));
    }
    normalize_action(actuator.actuator_type, action)
}

fn resting_state(t: ActuatorType) -> &'static str {
    if t.allowed_states().contains(&"off") {
        "off"
    } else {
        "closed"
    }
}

fn validate_rules(t: ActuatorType, rules: &mut BTreeMap<SensorType, AutoRule>) -> FarmResult<()> {
    for rule in rules.values_mut() {
        if !rule.threshold.is_finite() {
            return Err(FarmError::validation("Rule threshold must be a finite number"));
        }
        rule.action = normalize_action(t, &rule.action)?;
    }
    Ok(())
}

fn push_log(logs: &mut Vec<ActuatorLog>, mut entry: ActuatorLog) -> ActuatorLog {
    entry.id = next_id(logs.iter().map(|l| l.id));
    logs.insert(0, entry.clone());
    logs.truncate(MAX_ACTUATOR_LOGS);
    entry
}

/// What a control request did to the stored actuator.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ControlRecord {
    pub actuator: Actuator,
    pub log: ActuatorLog,
}

/// State reported by a device over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeviceState {
    pub state: String,
    pub timestamp: DateTime<Utc>,
    pub mode: Option<ActuatorMode>,
    #[schema(value_type = Object)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl FarmStore {
    pub async fn list_actuators(&self, filter: &ActuatorFilter) -> FarmResult<Vec<Actuator>> {
        let actuators: Vec<Actuator> = self.read().await?;
        Ok(filter::apply(&actuators, |a| filter.matches(a)))
    }

    pub async fn get_actuator(&self, id: u64) -> FarmResult<Actuator> {
        let actuators: Vec<Actuator> = self.read().await?;
        actuators
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| FarmError::not_found("Actuator", id))
    }

    pub async fn create_actuator(&self, input: NewActuator) -> FarmResult<Actuator> {
        let name = require_text("name", &input.name)?;
        let location = require_text("location", &input.location)?;
        let t = input.actuator_type;
        let status = match input.status.as_deref() {
            Some(s) => normalize_action(t, s)?,
            None => resting_state(t).to_owned(),
        };
        let mut auto_rules = input.auto_rules;
        validate_rules(t, &mut auto_rules)?;
        let now = Utc::now();

        let actuator = self
            .mutate(|actuators: &mut Vec<Actuator>| {
                let a = Actuator {
                    id: next_id(actuators.iter().map(|a| a.id)),
                    name,
                    actuator_type: t,
                    location,
                    status,
                    mode: input.mode.unwrap_or(ActuatorMode::Manual),
                    is_active: input.is_active.unwrap_or(true),
                    mqtt_topic: input.mqtt_topic,
                    description: input.description,
                    parameters: input.parameters,
                    auto_rules,
                    last_control_time: None,
                    created_at: now,
                    updated_at: now,
                };
                actuators.push(a.clone());
                Ok(a)
            })
            .await?;

        info!(actuator_id = actuator.id, actuator_type = %actuator.actuator_type, "Actuator created");
        Ok(actuator)
    }

    pub async fn update_actuator(&self, id: u64, update: ActuatorUpdate) -> FarmResult<Actuator> {
        let name = update.name.as_deref().map(|n| require_text("name", n)).transpose()?;
        let location = update
            .location
            .as_deref()
            .map(|l| require_text("location", l))
            .transpose()?;

        self.mutate(|actuators: &mut Vec<Actuator>| {
            let a = actuators
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| FarmError::not_found("Actuator", id))?;
            if let Some(name) = name {
                a.name = name;
            }
            if let Some(location) = location {
                a.location = location;
            }
            if let Some(mode) = update.mode {
                a.mode = mode;
            }
            if let Some(active) = update.is_active {
                a.is_active = active;
            }
            if update.mqtt_topic.is_some() {
                a.mqtt_topic = update.mqtt_topic;
            }
            if update.description.is_some() {
                a.description = update.description;
            }
            a.updated_at = Utc::now();
            Ok(a.clone())
        })
        .await
    }

    pub async fn delete_actuator(&self, id: u64) -> FarmResult<()> {
        self.mutate(|actuators: &mut Vec<Actuator>| {
            let before = actuators.len();
            actuators.retain(|a| a.id != id);
            if actuators.len() == before {
                return Err(FarmError::not_found("Actuator", id));
            }
            Ok(())
        })
        .await?;
        // Ids are reused once the highest one is gone.
        let dropped = self
            .mutate(|logs: &mut Vec<ActuatorLog>| {
                let before = logs.len();
                logs.retain(|l| l.actuator_id != id);
                Ok(before - logs.len())
            })
            .await?;
        info!(actuator_id = id, dropped_logs = dropped, "Actuator deleted");
        Ok(())
    }

    /// Writes the outcome of a control request: new status, control time and
    /// a log entry. Validation is repeated under the write lock.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_control(
        &self,
        id: u64,
        action: &str,
        at: DateTime<Utc>,
        source: LogSource,
        user: &str,
        parameters: BTreeMap<String, serde_json::Value>,
        delivered: bool,
    ) -> FarmResult<ControlRecord> {
        let (actuator, previous) = self
            .mutate(|actuators: &mut Vec<Actuator>| {
                let a = actuators
                    .iter_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| FarmError::not_found("Actuator", id))?;
                let action = check_controllable(a, action)?;
                let previous = std::mem::replace(&mut a.status, action);
                a.last_control_time = Some(at);
                a.updated_at = at;
                Ok((a.clone(), previous))
            })
            .await?;

        let message = format!(
            "{} switched from {previous} to {}",
            actuator.name, actuator.status
        );
        let log = self
            .mutate(|logs: &mut Vec<ActuatorLog>| {
                Ok(push_log(
                    logs,
                    ActuatorLog {
                        id: 0,
                        actuator_id: id,
                        timestamp: at,
                        action: actuator.status.clone(),
                        previous_state: Some(previous),
                        message,
                        user: user.to_owned(),
                        source,
                        parameters,
                        delivered,
                    },
                ))
            })
            .await?;

        Ok(ControlRecord { actuator, log })
    }

    /// Replaces the actuator's automation rules.
    pub async fn update_auto_rules(
        &self,
        id: u64,
        mut rules: BTreeMap<SensorType, AutoRule>,
    ) -> FarmResult<Actuator> {
        self.mutate(|actuators: &mut Vec<Actuator>| {
            let a = actuators
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| FarmError::not_found("Actuator", id))?;
            validate_rules(a.actuator_type, &mut rules)?;
            a.auto_rules = rules;
            a.updated_at = Utc::now();
            Ok(a.clone())
        })
        .await
    }

    /// Merges `params` into the actuator's parameters; a `null` value removes
    /// the key.
    pub async fn merge_parameters(
        &self,
        id: u64,
        params: BTreeMap<String, serde_json::Value>,
    ) -> FarmResult<Actuator> {
        self.mutate(|actuators: &mut Vec<Actuator>| {
            let a = actuators
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| FarmError::not_found("Actuator", id))?;
            for (k, v) in params {
                if v.is_null() {
                    a.parameters.remove(&k);
                } else {
                    a.parameters.insert(k, v);
                }
            }
            a.updated_at = Utc::now();
            Ok(a.clone())
        })
        .await
    }

    /// Log entries for one actuator, newest first.
    pub async fn actuator_logs(&self, id: u64, limit: Option<usize>) -> FarmResult<Vec<ActuatorLog>> {
        self.get_actuator(id).await?;
        let logs: Vec<ActuatorLog> = self.read().await?;
        let mut out: Vec<ActuatorLog> = logs.into_iter().filter(|l| l.actuator_id == id).collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Flags a log entry once its device command has gone out.
    pub async fn mark_log_delivered(&self, log_id: u64) -> FarmResult<()> {
        self.mutate(|logs: &mut Vec<ActuatorLog>| {
            if let Some(log) = logs.iter_mut().find(|l| l.id == log_id) {
                log.delivered = true;
            }
            Ok(())
        })
        .await
    }

    /// Applies a device-reported state to every actuator the topic
    /// addresses. Reports older than an actuator's last control time are
    /// ignored. Returns the actuators that changed.
    pub async fn apply_pushed_state(
        &self,
        topic: &str,
        actuator_type: ActuatorType,
        location: &str,
        report: &DeviceState,
    ) -> FarmResult<Vec<Actuator>> {
        let state = report.state.trim().to_lowercase();
        let changed = self
            .mutate(|actuators: &mut Vec<Actuator>| {
                let targets = push_targets(
                    actuators,
                    topic,
                    |a| a.mqtt_topic.as_deref(),
                    |a| a.actuator_type == actuator_type && same_location(&a.location, location),
                );
                let mut changed = Vec::new();
                for i in targets {
                    let a = &mut actuators[i];
                    if a.last_control_time.is_some_and(|t| report.timestamp < t) {
                        debug!(actuator_id = a.id, "Ignoring device state older than last control");
                        continue;
                    }
                    let previous = std::mem::replace(&mut a.status, state.clone());
                    a.last_control_time = Some(report.timestamp);
                    a.is_active = true;
                    if let Some(mode) = report.mode {
                        a.mode = mode;
                    }
                    for (k, v) in &report.params {
                        a.parameters.insert(k.clone(), v.clone());
                    }
                    a.updated_at = Utc::now();
                    changed.push((a.clone(), previous));
                }
                Ok(changed)
            })
            .await?;

        let transitions: Vec<&(Actuator, String)> =
            changed.iter().filter(|(a, prev)| a.status != *prev).collect();
        if !transitions.is_empty() {
            self.mutate(|logs: &mut Vec<ActuatorLog>| {
                for (a, prev) in &transitions {
                    push_log(
                        logs,
                        ActuatorLog {
                            id: 0,
                            actuator_id: a.id,
                            timestamp: report.timestamp,
                            action: a.status.clone(),
                            previous_state: Some(prev.clone()),
                            message: format!("{} reported {}", a.name, a.status),
                            user: "device".to_owned(),
                            source: LogSource::Device,
                            parameters: report.params.clone(),
                            delivered: true,
                        },
                    );
                }
                Ok(())
            })
            .await?;
        }

        Ok(changed.into_iter().map(|(a, _)| a).collect())
    }
}
