use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::{
    filter::{self, AlertFilter},
    input::{NewThreshold, ThresholdUpdate},
    next_id, same_location, FarmStore,
};
use crate::{
    db::models::{
        Alert, AlertPreferences, AlertThreshold, AlertValues, Condition, Reading, Sensor,
        Severity,
    },
    envelope::Page,
    error::{FarmError, FarmResult},
};

/// Feed topic alerts are pushed on.
pub const ALERTS_TOPIC: &str = "farm/alerts";

const MAX_ALERTS: usize = 1000;

fn direction(condition: Condition) -> (&'static str, &'static str) {
    match condition {
        Condition::Gt | Condition::Gte => ("high", "too high"),
        Condition::Lt | Condition::Lte => ("low", "too low"),
        Condition::Eq => ("reached", "reached threshold"),
        Condition::Change => ("change", "changed sharply"),
    }
}

fn build_alert(sensor: &Sensor, reading: &Reading, threshold: &AlertThreshold) -> Alert {
    let (suffix, phrase) = direction(threshold.condition);
    let label = sensor.sensor_type.label();
    Alert {
        id: 0,
        alert_type: format!("{}_{suffix}", sensor.sensor_type),
        severity: threshold.severity,
        message: format!("{label} {phrase}"),
        details: format!(
            "{label} {value}{unit} from {device} in {location} is {cond} {threshold}{unit}.",
            value = reading.value,
            unit = reading.unit,
            device = sensor.name,
            location = sensor.location,
            cond = threshold.condition.describe(),
            threshold = threshold.threshold,
        ),
        location: sensor.location.clone(),
        device: sensor.name.clone(),
        values: Some(AlertValues {
            value: reading.value,
            unit: reading.unit.clone(),
            threshold: threshold.threshold,
        }),
        is_read: false,
        is_acknowledged: false,
        timestamp: reading.timestamp,
        threshold_id: Some(threshold.id),
    }
}

impl FarmStore {
    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    /// Newest first, filtered, then paged.
    pub async fn list_alerts(
        &self,
        filter: &AlertFilter,
        page: usize,
        limit: usize,
    ) -> FarmResult<Page<Alert>> {
        let alerts: Vec<Alert> = self.read().await?;
        let matching = filter::apply(&alerts, |a| filter.matches(a));
        Ok(Page::slice(&matching, page, limit))
    }

    pub async fn unread_alert_count(&self) -> FarmResult<usize> {
        let alerts: Vec<Alert> = self.read().await?;
        Ok(alerts.iter().filter(|a| !a.is_read).count())
    }

    pub async fn mark_alert_read(&self, id: u64) -> FarmResult<Alert> {
        self.mutate(|alerts: &mut Vec<Alert>| {
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| FarmError::not_found("Alert", id))?;
            alert.is_read = true;
            Ok(alert.clone())
        })
        .await
    }

    /// Returns how many alerts changed.
    pub async fn mark_all_alerts_read(&self) -> FarmResult<usize> {
        self.mutate(|alerts: &mut Vec<Alert>| {
            let mut changed = 0;
            for a in alerts.iter_mut().filter(|a| !a.is_read) {
                a.is_read = true;
                changed += 1;
            }
            Ok(changed)
        })
        .await
    }

    pub async fn acknowledge_alert(&self, id: u64) -> FarmResult<Alert> {
        self.mutate(|alerts: &mut Vec<Alert>| {
            let alert = alerts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| FarmError::not_found("Alert", id))?;
            alert.is_read = true;
            alert.is_acknowledged = true;
            Ok(alert.clone())
        })
        .await
    }

    pub async fn delete_alert(&self, id: u64) -> FarmResult<()> {
        self.mutate(|alerts: &mut Vec<Alert>| {
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            if alerts.len() == before {
                return Err(FarmError::not_found("Alert", id));
            }
            Ok(())
        })
        .await
    }

    /// Stores `alert` unless an unacknowledged alert of the same type and
    /// location is already open. Returns the stored alert.
    pub async fn raise_alert(&self, mut alert: Alert) -> FarmResult<Option<Alert>> {
        let prefs: AlertPreferences = self.read().await?;
        if prefs.auto_acknowledge_low_severity && alert.severity == Severity::Low {
            alert.is_read = true;
            alert.is_acknowledged = true;
        }

        let stored = self
            .mutate(|alerts: &mut Vec<Alert>| {
                let open = alerts.iter().any(|a| {
                    !a.is_acknowledged
                        && a.alert_type == alert.alert_type
                        && same_location(&a.location, &alert.location)
                });
                if open {
                    return Ok(None);
                }
                alert.id = next_id(alerts.iter().map(|a| a.id));
                alerts.insert(0, alert.clone());
                alerts.truncate(MAX_ALERTS);
                Ok(Some(alert))
            })
            .await?;

        match &stored {
            Some(alert) => {
                info!(
                    alert_id = alert.id,
                    alert_type = %alert.alert_type,
                    location = %alert.location,
                    "Alert raised"
                );
                if !prefs.mute_notifications {
                    self.events().publish(ALERTS_TOPIC, json!(alert));
                }
            }
            None => debug!("Alert suppressed; an open alert of the same kind exists"),
        }
        Ok(stored)
    }

    /// Checks every active threshold for the sensor's type against `reading`
    /// and raises the resulting alerts.
    pub async fn evaluate_thresholds(
        &self,
        sensor: &Sensor,
        reading: &Reading,
        previous: Option<f64>,
    ) -> FarmResult<Vec<Alert>> {
        let thresholds: Vec<AlertThreshold> = self.read().await?;
        let mut raised = Vec::new();
        for t in thresholds
            .iter()
            .filter(|t| t.is_active && t.sensor_type == sensor.sensor_type)
        {
            if !t.condition.holds(reading.value, t.threshold, previous) {
                continue;
            }
            if let Some(alert) = self.raise_alert(build_alert(sensor, reading, t)).await? {
                raised.push(alert);
            }
        }
        Ok(raised)
    }

    // -----------------------------------------------------------------------
    // Thresholds
    // -----------------------------------------------------------------------

    pub async fn list_thresholds(&self) -> FarmResult<Vec<AlertThreshold>> {
        self.read().await
    }

    pub async fn create_threshold(&self, input: NewThreshold) -> FarmResult<AlertThreshold> {
        if !input.threshold.is_finite() {
            return Err(FarmError::validation("Threshold must be a finite number"));
        }
        self.mutate(|thresholds: &mut Vec<AlertThreshold>| {
            let t = AlertThreshold {
                id: next_id(thresholds.iter().map(|t| t.id)),
                sensor_type: input.sensor_type,
                condition: input.condition,
                threshold: input.threshold,
                severity: input.severity,
                notification_method: input.notification_method,
                is_active: input.is_active,
            };
            thresholds.push(t.clone());
            Ok(t)
        })
        .await
    }

    pub async fn update_threshold(
        &self,
        id: u64,
        update: ThresholdUpdate,
    ) -> FarmResult<AlertThreshold> {
        if update.threshold.is_some_and(|v| !v.is_finite()) {
            return Err(FarmError::validation("Threshold must be a finite number"));
        }
        self.mutate(|thresholds: &mut Vec<AlertThreshold>| {
            let t = thresholds
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| FarmError::not_found("Threshold", id))?;
            if let Some(v) = update.sensor_type {
                t.sensor_type = v;
            }
            if let Some(v) = update.condition {
                t.condition = v;
            }
            if let Some(v) = update.threshold {
                t.threshold = v;
            }
            if let Some(v) = update.severity {
                t.severity = v;
            }
            if let Some(v) = update.notification_method {
                t.notification_method = v;
            }
            if let Some(v) = update.is_active {
                t.is_active = v;
            }
            Ok(t.clone())
        })
        .await
    }

    pub async fn delete_threshold(&self, id: u64) -> FarmResult<()> {
        self.mutate(|thresholds: &mut Vec<AlertThreshold>| {
            let before = thresholds.len();
            thresholds.retain(|t| t.id != id);
            if thresholds.len() == before {
                return Err(FarmError::not_found("Threshold", id));
            }
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Preferences
    // -----------------------------------------------------------------------

    pub async fn alert_preferences(&self) -> FarmResult<AlertPreferences> {
        self.read().await
    }

    pub async fn update_alert_preferences(
        &self,
        prefs: AlertPreferences,
    ) -> FarmResult<AlertPreferences> {
        self.mutate(|stored: &mut AlertPreferences| {
            *stored = prefs;
            Ok(stored.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        db::models::{SensorStatus, SensorType},
        farm::test_support::demo_store,
    };

    fn greenhouse_sensor(t: SensorType) -> Sensor {
        Sensor {
            id: 1,
            name: "Temperature Sensor 1".into(),
            sensor_type: t,
            location: "Greenhouse 1".into(),
            status: SensorStatus::Active,
            mqtt_topic: None,
            model: None,
            manufacturer: None,
            last_reading: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reading(value: f64) -> Reading {
        Reading {
            value,
            unit: "°C".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn high_temperature_raises_alert() {
        let store = demo_store();
        let mut feed = store.events().subscribe();
        let sensor = greenhouse_sensor(SensorType::Temperature);

        let raised = store
            .evaluate_thresholds(&sensor, &reading(33.0), Some(29.0))
            .await
            .unwrap();
        assert_eq!(raised.len(), 1);
        let alert = &raised[0];
        assert_eq!(alert.alert_type, "temperature_high");
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.threshold_id, Some(1));
        assert_eq!(alert.values.as_ref().unwrap().threshold, 30.0);

        let event = feed.try_recv().unwrap();
        assert_eq!(event.topic, ALERTS_TOPIC);
        assert_eq!(event.payload["type"], "temperature_high");
    }

    #[tokio::test]
    async fn open_alert_suppresses_duplicates_until_acknowledged() {
        let store = demo_store();
        let sensor = greenhouse_sensor(SensorType::Temperature);

        assert_eq!(store.evaluate_thresholds(&sensor, &reading(33.0), None).await.unwrap().len(), 1);
        assert!(store.evaluate_thresholds(&sensor, &reading(34.0), None).await.unwrap().is_empty());

        store.acknowledge_alert(1).await.unwrap();
        let again = store.evaluate_thresholds(&sensor, &reading(35.0), None).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, 2);
    }

    #[tokio::test]
    async fn muted_alerts_are_stored_but_not_pushed() {
        let store = demo_store();
        store
            .update_alert_preferences(AlertPreferences {
                mute_notifications: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let mut feed = store.events().subscribe();

        let sensor = greenhouse_sensor(SensorType::Humidity);
        let raised = store.evaluate_thresholds(&sensor, &reading(90.0), None).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert!(feed.try_recv().is_err());
        assert_eq!(store.unread_alert_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn low_severity_is_auto_acknowledged_when_enabled() {
        let store = demo_store();
        store
            .update_alert_preferences(AlertPreferences {
                auto_acknowledge_low_severity: true,
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_threshold(NewThreshold {
                sensor_type: SensorType::Light,
                condition: Condition::Lt,
                threshold: 200.0,
                severity: Severity::Low,
                notification_method: vec!["app".into()],
                is_active: true,
            })
            .await
            .unwrap();

        let sensor = greenhouse_sensor(SensorType::Light);
        let raised = store.evaluate_thresholds(&sensor, &reading(50.0), None).await.unwrap();
        assert!(raised[0].is_read && raised[0].is_acknowledged);
        assert_eq!(store.unread_alert_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn change_threshold_uses_previous_value() {
        let store = demo_store();
        store
            .create_threshold(NewThreshold {
                sensor_type: SensorType::Pressure,
                condition: Condition::Change,
                threshold: 10.0,
                severity: Severity::Medium,
                notification_method: vec![],
                is_active: true,
            })
            .await
            .unwrap();
        let sensor = greenhouse_sensor(SensorType::Pressure);

        assert!(store.evaluate_thresholds(&sensor, &reading(1000.0), None).await.unwrap().is_empty());
        let raised = store
            .evaluate_thresholds(&sensor, &reading(1015.0), Some(1000.0))
            .await
            .unwrap();
        assert_eq!(raised[0].alert_type, "pressure_change");
    }

    #[tokio::test]
    async fn listing_filters_then_pages_newest_first() {
        let store = demo_store();
        for (t, v) in [
            (SensorType::Temperature, 33.0),
            (SensorType::Humidity, 90.0),
            (SensorType::SoilMoisture, 5.0),
        ] {
            let mut r = reading(v);
            r.timestamp = Utc::now() - Duration::minutes(1);
            store.evaluate_thresholds(&greenhouse_sensor(t), &r, None).await.unwrap();
        }

        let all = store.list_alerts(&AlertFilter::default(), 1, 10).await.unwrap();
        let ids: Vec<u64> = all.items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let high = store
            .list_alerts(
                &AlertFilter {
                    severity: Some(Severity::High),
                    ..Default::default()
                },
                1,
                10,
            )
            .await
            .unwrap();
        let ids: Vec<u64> = high.items.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1]);

        let second_page = store.list_alerts(&AlertFilter::default(), 2, 2).await.unwrap();
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.total, 3);
    }

    #[tokio::test]
    async fn alert_history_keeps_the_newest_thousand() {
        let store = demo_store();
        store
            .mutate(|alerts: &mut Vec<Alert>| {
                let template = Alert {
                    id: 0,
                    alert_type: "humidity_high".into(),
                    severity: Severity::Medium,
                    message: "Humidity too high".into(),
                    details: String::new(),
                    location: "Greenhouse 3".into(),
                    device: "Humidity Sensor 3".into(),
                    values: None,
                    is_read: true,
                    is_acknowledged: true,
                    timestamp: Utc::now(),
                    threshold_id: None,
                };
                *alerts = (1..=MAX_ALERTS as u64)
                    .rev()
                    .map(|id| Alert { id, ..template.clone() })
                    .collect();
                Ok(())
            })
            .await
            .unwrap();

        let sensor = greenhouse_sensor(SensorType::Temperature);
        let raised = store.evaluate_thresholds(&sensor, &reading(33.0), None).await.unwrap();
        assert_eq!(raised[0].id, MAX_ALERTS as u64 + 1);

        let all = store.list_alerts(&AlertFilter::default(), 1, 5).await.unwrap();
        assert_eq!(all.total, MAX_ALERTS);
        assert_eq!(all.items[0].id, MAX_ALERTS as u64 + 1);
        let stored: Vec<Alert> = store.read().await.unwrap();
        assert!(stored.iter().all(|a| a.id != 1));
    }

    #[tokio::test]
    async fn mark_all_read_counts_changes() {
        let store = demo_store();
        let sensor = greenhouse_sensor(SensorType::Temperature);
        store.evaluate_thresholds(&sensor, &reading(5.0), None).await.unwrap();
        store.evaluate_thresholds(&sensor, &reading(40.0), None).await.unwrap();

        assert_eq!(store.mark_all_alerts_read().await.unwrap(), 2);
        assert_eq!(store.mark_all_alerts_read().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn threshold_crud() {
        let store = demo_store();
        let updated = store
            .update_threshold(
                2,
                ThresholdUpdate {
                    threshold: Some(8.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.threshold, 8.0);
        assert_eq!(updated.condition, Condition::Lt);

        store.delete_threshold(2).await.unwrap();
        let ids: Vec<u64> = store.list_thresholds().await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 4, 5]);

        let err = store.delete_threshold(2).await.unwrap_err();
        assert_eq!(err.to_string(), "Threshold with ID 2 not found");
    }
}
