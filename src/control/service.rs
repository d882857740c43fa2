use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::time;
use tracing::{debug, error, info, warn};

use super::{rules::select_action, CommandSink};
use crate::{
    db::models::{Actuator, LogSource, SensorType},
    error::FarmResult,
    farm::{
        actuators::{check_controllable, ControlRecord},
        ActuatorFilter, FarmStore,
    },
    realtime::{merge::LiveState, topic::actuator_topic},
};

/// Applies control requests to the store and the device, and runs the
/// automation rules against live readings.
#[derive(Clone)]
pub struct ControlService {
    store: FarmStore,
    live: LiveState,
    sink: Arc<dyn CommandSink>,
    interval: Duration,
}

fn command_topic(actuator: &Actuator) -> String {
    actuator
        .mqtt_topic
        .clone()
        .unwrap_or_else(|| actuator_topic(actuator.actuator_type, &actuator.location))
}

impl ControlService {
    pub fn new(
        store: FarmStore,
        live: LiveState,
        sink: Arc<dyn CommandSink>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            live,
            sink,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Switches actuator `id` to `action`. The stored status changes even if
    /// the device command cannot be published; the log says which.
    pub async fn apply(
        &self,
        id: u64,
        action: &str,
        parameters: BTreeMap<String, Value>,
        source: LogSource,
        user: &str,
    ) -> FarmResult<ControlRecord> {
        self.execute(id, action, parameters.clone(), parameters, source, user)
            .await
    }

    /// `command` goes to the device; `logged` is kept on the log entry only.
    async fn execute(
        &self,
        id: u64,
        action: &str,
        command: BTreeMap<String, Value>,
        logged: BTreeMap<String, Value>,
        source: LogSource,
        user: &str,
    ) -> FarmResult<ControlRecord> {
        let actuator = self.store.get_actuator(id).await?;
        let action = check_controllable(&actuator, action)?;
        let at = Utc::now();

        let mut record = self
            .store
            .record_control(id, &action, at, source, user, logged, false)
            .await?;

        let topic = command_topic(&record.actuator);
        let payload = json!({
            "action": action,
            "state": action,
            "timestamp": at.to_rfc3339(),
            "device_id": id,
            "location": record.actuator.location,
            "params": command,
        });
        match self.sink.publish(&topic, &payload).await {
            Ok(()) => {
                self.store.mark_log_delivered(record.log.id).await?;
                record.log.delivered = true;
                info!(actuator_id = id, topic = %topic, action = %action, "Command published");
            }
            Err(e) => {
                warn!(actuator_id = id, topic = %topic, error = %e, "Command not delivered");
            }
        }
        Ok(record)
    }

    /// Runs the automation loop indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Control loop started");
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(0) => {}
                Ok(n) => info!(applied = n, "Automation rules applied"),
                Err(e) => error!(error = %e, "Control loop iteration failed"),
            }
        }
    }

    /// One pass over every actuator. Returns how many were switched.
    pub async fn run_once(&self) -> FarmResult<usize> {
        let actuators = self.store.list_actuators(&ActuatorFilter::default()).await?;
        let mut applied = 0;

        for actuator in &actuators {
            let mut readings = BTreeMap::new();
            for sensor_type in actuator.auto_rules.keys() {
                if let Some(live) = self.live.sensor(*sensor_type, &actuator.location).await {
                    readings.insert(*sensor_type, live);
                }
            }
            let Some(decision) = select_action(actuator, &readings) else {
                continue;
            };

            debug!(
                actuator_id = actuator.id,
                sensor_type = %decision.sensor_type,
                value = decision.value,
                action = %decision.action,
                "Automation rule fired"
            );
            // Trigger details stay in the log. The device echoes its command
            // back, and echoed params are merged into the actuator.
            let trigger = rule_parameters(decision.sensor_type, decision.value);
            match self
                .execute(
                    actuator.id,
                    &decision.action,
                    BTreeMap::new(),
                    trigger,
                    LogSource::Auto,
                    "system",
                )
                .await
            {
                Ok(_) => applied += 1,
                Err(e) => warn!(actuator_id = actuator.id, error = %e, "Automation rule not applied"),
            }
        }
        Ok(applied)
    }
}

fn rule_parameters(sensor_type: SensorType, value: f64) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("trigger_sensor".to_owned(), json!(sensor_type)),
        ("trigger_value".to_owned(), json!(value)),
    ])
}

#[cfg(test)]
pub(crate) mod test_sink {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::control::CommandSink;

    /// Records every publish; fails them all when `fail` is set.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(String, Value)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn publish(&self, topic: &str, payload: &Value) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("broker unavailable");
            }
            self.sent.lock().unwrap().push((topic.to_owned(), payload.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_sink::RecordingSink, *};
    use crate::{
        db::models::Reading, error::FarmError, farm::test_support::demo_store,
        ingest::IngestService,
    };

    fn service(sink: Arc<RecordingSink>) -> (ControlService, FarmStore, LiveState) {
        let store = demo_store();
        let live = LiveState::new();
        (
            ControlService::new(store.clone(), live.clone(), sink, 10),
            store,
            live,
        )
    }

    #[tokio::test]
    async fn control_is_visible_on_next_read_and_published() {
        let sink = Arc::new(RecordingSink::default());
        let (control, store, _) = service(sink.clone());

        let record = control
            .apply(1, "ON", BTreeMap::new(), LogSource::Web, "alice")
            .await
            .unwrap();
        assert_eq!(record.actuator.status, "on");
        assert!(record.log.delivered);
        assert_eq!(record.log.previous_state.as_deref(), Some("off"));

        assert_eq!(store.get_actuator(1).await.unwrap().status, "on");
        let logs = store.actuator_logs(1, None).await.unwrap();
        assert!(logs[0].delivered);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "farm/actuators/irrigation/1");
        assert_eq!(sent[0].1["state"], "on");
        assert_eq!(sent[0].1["device_id"], 1);
    }

    #[tokio::test]
    async fn undelivered_command_still_updates_store() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let (control, store, _) = service(sink);

        let record = control
            .apply(1, "on", BTreeMap::new(), LogSource::Web, "alice")
            .await
            .unwrap();
        assert!(!record.log.delivered);
        assert_eq!(store.get_actuator(1).await.unwrap().status, "on");
        assert!(!store.actuator_logs(1, None).await.unwrap()[0].delivered);
    }

    #[tokio::test]
    async fn invalid_action_and_inactive_actuator_are_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let (control, store, _) = service(sink.clone());

        let err = control
            .apply(1, "dim", BTreeMap::new(), LogSource::Web, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));

        // id 4 is inactive
        let err = control
            .apply(4, "on", BTreeMap::new(), LogSource::Web, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, FarmError::Conflict(_)));

        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(store.get_actuator(1).await.unwrap().status, "off");
    }

    #[tokio::test]
    async fn run_once_applies_rules_from_live_readings() {
        let sink = Arc::new(RecordingSink::default());
        let (control, store, live) = service(sink.clone());

        assert_eq!(control.run_once().await.unwrap(), 0);

        live.merge_sensor(
            "farm/sensors/temperature/Greenhouse_2",
            SensorType::Temperature,
            "Greenhouse 2",
            Reading {
                value: 32.0,
                unit: "°C".into(),
                timestamp: Utc::now(),
            },
        )
        .await;

        assert_eq!(control.run_once().await.unwrap(), 1);
        let fan = store.get_actuator(2).await.unwrap();
        assert_eq!(fan.status, "high");
        let log = &store.actuator_logs(2, None).await.unwrap()[0];
        assert_eq!(log.source, LogSource::Auto);
        assert_eq!(log.user, "system");

        // Already high: nothing more to do.
        assert_eq!(control.run_once().await.unwrap(), 0);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn echoed_rule_command_leaves_parameters_alone() {
        let sink = Arc::new(RecordingSink::default());
        let (control, store, live) = service(sink.clone());
        let ingest = IngestService::new(store.clone(), live.clone());
        let before = store.get_actuator(2).await.unwrap().parameters;

        live.merge_sensor(
            "farm/sensors/temperature/Greenhouse_2",
            SensorType::Temperature,
            "Greenhouse 2",
            Reading {
                value: 32.0,
                unit: "°C".into(),
                timestamp: Utc::now(),
            },
        )
        .await;
        assert_eq!(control.run_once().await.unwrap(), 1);

        let (topic, payload) = sink.sent.lock().unwrap()[0].clone();
        assert_eq!(payload["params"], serde_json::json!({}));
        ingest
            .handle(&topic, payload.to_string().as_bytes())
            .await
            .unwrap();

        let fan = store.get_actuator(2).await.unwrap();
        assert_eq!(fan.status, "high");
        assert_eq!(fan.parameters, before);

        let log = &store.actuator_logs(2, None).await.unwrap()[0];
        assert_eq!(log.parameters["trigger_sensor"], "temperature");
        assert_eq!(log.parameters["trigger_value"], 32.0);
    }
}
