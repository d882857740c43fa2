use std::{collections::BTreeMap, future::Future};

use reqwest::Method;
use serde_json::Value;
use tracing::warn;

use super::client::{query_pairs, RemoteClient, RemoteError};
use crate::{
    control::ControlService,
    db::models::{
        Actuator, ActuatorLog, Alert, AlertPreferences, AlertThreshold, AutoRule, LogSource,
        ReadingRecord, Sensor, SensorType,
    },
    envelope::Page,
    error::{FarmError, FarmResult},
    farm::{
        actuators::ControlRecord,
        input::{
            ActuatorUpdate, ControlCommand, NewActuator, NewReading, NewSensor, NewThreshold,
            SensorUpdate, ThresholdUpdate,
        },
        ActuatorFilter, AlertFilter, FarmStore, SensorFilter,
    },
};

impl From<RemoteError> for FarmError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Rejected { status: 404, message } => FarmError::NotFound(message),
            RemoteError::Rejected { status: 400, message } => FarmError::Validation(message),
            RemoteError::Rejected { status: 409, message } => FarmError::Conflict(message),
            RemoteError::Rejected { message, .. } => FarmError::Upstream(message),
            other => FarmError::Upstream(other.to_string()),
        }
    }
}

/// Resource operations. Each one tries the remote API when configured and
/// falls back to the local store when the remote cannot be reached.
#[derive(Clone)]
pub struct FarmApi {
    remote: Option<RemoteClient>,
    local: FarmStore,
    control: ControlService,
}

impl FarmApi {
    pub fn new(remote: Option<RemoteClient>, local: FarmStore, control: ControlService) -> Self {
        Self {
            remote,
            local,
            control,
        }
    }

    pub fn local(&self) -> &FarmStore {
        &self.local
    }

    async fn via<T, R, RF, LF>(&self, op: &'static str, remote: R, local: LF) -> FarmResult<T>
    where
        R: FnOnce(RemoteClient) -> RF,
        RF: Future<Output = Result<T, RemoteError>>,
        LF: Future<Output = FarmResult<T>>,
    {
        if let Some(client) = &self.remote {
            match remote(client.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_unreachable() => {
                    warn!(op, error = %e, "Upstream unreachable, using local store");
                }
                Err(e) => return Err(e.into()),
            }
        }
        local.await
    }

    // --- sensors -----------------------------------------------------------

    pub async fn list_sensors(&self, filter: SensorFilter) -> FarmResult<Vec<Sensor>> {
        let query = query_pairs(&filter);
        self.via(
            "list_sensors",
            |c| async move { c.request(Method::GET, "/sensors", &query, None::<&()>).await },
            self.local.list_sensors(&filter),
        )
        .await
    }

    pub async fn get_sensor(&self, id: u64) -> FarmResult<Sensor> {
        self.via(
            "get_sensor",
            |c| async move {
                c.request(Method::GET, &format!("/sensors/{id}"), &[], None::<&()>)
                    .await
            },
            self.local.get_sensor(id),
        )
        .await
    }

    pub async fn create_sensor(&self, input: NewSensor) -> FarmResult<Sensor> {
        let body = input.clone();
        self.via(
            "create_sensor",
            |c| async move { c.request(Method::POST, "/sensors", &[], Some(&body)).await },
            self.local.create_sensor(input),
        )
        .await
    }

    pub async fn update_sensor(&self, id: u64, update: SensorUpdate) -> FarmResult<Sensor> {
        let body = update.clone();
        self.via(
            "update_sensor",
            |c| async move {
                c.request(Method::PUT, &format!("/sensors/{id}"), &[], Some(&body))
                    .await
            },
            self.local.update_sensor(id, update),
        )
        .await
    }

    pub async fn delete_sensor(&self, id: u64) -> FarmResult<()> {
        self.via(
            "delete_sensor",
            |c| async move {
                c.execute(Method::DELETE, &format!("/sensors/{id}"), None::<&()>)
                    .await
            },
            self.local.delete_sensor(id),
        )
        .await
    }

    pub async fn sensor_readings(
        &self,
        id: u64,
        limit: Option<usize>,
    ) -> FarmResult<Vec<ReadingRecord>> {
        let query: Vec<(String, String)> = limit
            .map(|l| vec![("limit".to_owned(), l.to_string())])
            .unwrap_or_default();
        self.via(
            "sensor_readings",
            |c| async move {
                c.request(Method::GET, &format!("/sensors/{id}/readings"), &query, None::<&()>)
                    .await
            },
            self.local.sensor_readings(id, limit),
        )
        .await
    }

    pub async fn add_reading(&self, id: u64, input: NewReading) -> FarmResult<ReadingRecord> {
        let body = input.clone();
        self.via(
            "add_reading",
            |c| async move {
                c.request(Method::POST, &format!("/sensors/{id}/readings"), &[], Some(&body))
                    .await
            },
            self.local.add_reading(id, input),
        )
        .await
    }

    // --- actuators ---------------------------------------------------------

    pub async fn list_actuators(&self, filter: ActuatorFilter) -> FarmResult<Vec<Actuator>> {
        let query = query_pairs(&filter);
        self.via(
            "list_actuators",
            |c| async move { c.request(Method::GET, "/actuators", &query, None::<&()>).await },
            self.local.list_actuators(&filter),
        )
        .await
    }

    pub async fn get_actuator(&self, id: u64) -> FarmResult<Actuator> {
        self.via(
            "get_actuator",
            |c| async move {
                c.request(Method::GET, &format!("/actuators/{id}"), &[], None::<&()>)
                    .await
            },
            self.local.get_actuator(id),
        )
        .await
    }

    pub async fn create_actuator(&self, input: NewActuator) -> FarmResult<Actuator> {
        let body = input.clone();
        self.via(
            "create_actuator",
            |c| async move { c.request(Method::POST, "/actuators", &[], Some(&body)).await },
            self.local.create_actuator(input),
        )
        .await
    }

    pub async fn update_actuator(&self, id: u64, update: ActuatorUpdate) -> FarmResult<Actuator> {
        let body = update.clone();
        self.via(
            "update_actuator",
            |c| async move {
                c.request(Method::PUT, &format!("/actuators/{id}"), &[], Some(&body))
                    .await
            },
            self.local.update_actuator(id, update),
        )
        .await
    }

    pub async fn delete_actuator(&self, id: u64) -> FarmResult<()> {
        self.via(
            "delete_actuator",
            |c| async move {
                c.execute(Method::DELETE, &format!("/actuators/{id}"), None::<&()>)
                    .await
            },
            self.local.delete_actuator(id),
        )
        .await
    }

    /// `user` is recorded in the actuator log.
    pub async fn control_actuator(
        &self,
        id: u64,
        command: ControlCommand,
        user: &str,
    ) -> FarmResult<ControlRecord> {
        let body = command.clone();
        self.via(
            "control_actuator",
            |c| async move {
                c.request(Method::POST, &format!("/actuators/{id}/control"), &[], Some(&body))
                    .await
            },
            self.control
                .apply(id, &command.action, command.parameters, LogSource::Web, user),
        )
        .await
    }

    pub async fn update_auto_rules(
        &self,
        id: u64,
        rules: BTreeMap<SensorType, AutoRule>,
    ) -> FarmResult<Actuator> {
        let body = rules.clone();
        self.via(
            "update_auto_rules",
            |c| async move {
                c.request(Method::PUT, &format!("/actuators/{id}/auto-rules"), &[], Some(&body))
                    .await
            },
            self.local.update_auto_rules(id, rules),
        )
        .await
    }

    pub async fn merge_parameters(
        &self,
        id: u64,
        params: BTreeMap<String, Value>,
    ) -> FarmResult<Actuator> {
        let body = params.clone();
        self.via(
            "merge_parameters",
            |c| async move {
                c.request(Method::PATCH, &format!("/actuators/{id}/parameters"), &[], Some(&body))
                    .await
            },
            self.local.merge_parameters(id, params),
        )
        .await
    }

    pub async fn actuator_logs(&self, id: u64, limit: Option<usize>) -> FarmResult<Vec<ActuatorLog>> {
        let query: Vec<(String, String)> = limit
            .map(|l| vec![("limit".to_owned(), l.to_string())])
            .unwrap_or_default();
        self.via(
            "actuator_logs",
            |c| async move {
                c.request(Method::GET, &format!("/actuators/{id}/logs"), &query, None::<&()>)
                    .await
            },
            self.local.actuator_logs(id, limit),
        )
        .await
    }

    // --- alerts ------------------------------------------------------------

    pub async fn list_alerts(
        &self,
        filter: AlertFilter,
        page: usize,
        limit: usize,
    ) -> FarmResult<Page<Alert>> {
        let mut query = query_pairs(&filter);
        query.push(("page".to_owned(), page.to_string()));
        query.push(("limit".to_owned(), limit.to_string()));
        self.via(
            "list_alerts",
            |c| async move { c.request(Method::GET, "/alerts", &query, None::<&()>).await },
            self.local.list_alerts(&filter, page, limit),
        )
        .await
    }

    pub async fn mark_alert_read(&self, id: u64) -> FarmResult<Alert> {
        self.via(
            "mark_alert_read",
            |c| async move {
                c.request(Method::PUT, &format!("/alerts/{id}/read"), &[], None::<&()>)
                    .await
            },
            self.local.mark_alert_read(id),
        )
        .await
    }

    pub async fn mark_all_alerts_read(&self) -> FarmResult<usize> {
        self.via(
            "mark_all_alerts_read",
            |c| async move { c.request(Method::PUT, "/alerts/read-all", &[], None::<&()>).await },
            self.local.mark_all_alerts_read(),
        )
        .await
    }

    pub async fn acknowledge_alert(&self, id: u64) -> FarmResult<Alert> {
        self.via(
            "acknowledge_alert",
            |c| async move {
                c.request(Method::PUT, &format!("/alerts/{id}/acknowledge"), &[], None::<&()>)
                    .await
            },
            self.local.acknowledge_alert(id),
        )
        .await
    }

    pub async fn delete_alert(&self, id: u64) -> FarmResult<()> {
        self.via(
            "delete_alert",
            |c| async move {
                c.execute(Method::DELETE, &format!("/alerts/{id}"), None::<&()>)
                    .await
            },
            self.local.delete_alert(id),
        )
        .await
    }

    // --- thresholds & preferences -------------------------------------------

    pub async fn list_thresholds(&self) -> FarmResult<Vec<AlertThreshold>> {
        self.via(
            "list_thresholds",
            |c| async move {
                c.request(Method::GET, "/alert-thresholds", &[], None::<&()>)
                    .await
            },
            self.local.list_thresholds(),
        )
        .await
    }

    pub async fn create_threshold(&self, input: NewThreshold) -> FarmResult<AlertThreshold> {
        let body = input.clone();
        self.via(
            "create_threshold",
            |c| async move {
                c.request(Method::POST, "/alert-thresholds", &[], Some(&body))
                    .await
            },
            self.local.create_threshold(input),
        )
        .await
    }

    pub async fn update_threshold(
        &self,
        id: u64,
        update: ThresholdUpdate,
    ) -> FarmResult<AlertThreshold> {
        let body = update.clone();
        self.via(
            "update_threshold",
            |c| async move {
                c.request(Method::PUT, &format!("/alert-thresholds/{id}"), &[], Some(&body))
                    .await
            },
            self.local.update_threshold(id, update),
        )
        .await
    }

    pub async fn delete_threshold(&self, id: u64) -> FarmResult<()> {
        self.via(
            "delete_threshold",
            |c| async move {
                c.execute(Method::DELETE, &format!("/alert-thresholds/{id}"), None::<&()>)
                    .await
            },
            self.local.delete_threshold(id),
        )
        .await
    }

    pub async fn alert_preferences(&self) -> FarmResult<AlertPreferences> {
        self.via(
            "alert_preferences",
            |c| async move {
                c.request(Method::GET, "/alert-preferences", &[], None::<&()>)
                    .await
            },
            self.local.alert_preferences(),
        )
        .await
    }

    pub async fn update_alert_preferences(
        &self,
        prefs: AlertPreferences,
    ) -> FarmResult<AlertPreferences> {
        let body = prefs.clone();
        self.via(
            "update_alert_preferences",
            |c| async move {
                c.request(Method::PUT, "/alert-preferences", &[], Some(&body))
                    .await
            },
            self.local.update_alert_preferences(prefs),
        )
        .await
    }
}
