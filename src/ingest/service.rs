use serde_json::Value;
use tracing::{debug, error, info};

use crate::{
    error::FarmError,
    farm::FarmStore,
    realtime::{
        merge::{ActuatorPayload, LiveState, MergeOutcome, PayloadError, SensorPayload},
        topic::{FarmTopic, TopicError},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Store(#[from] FarmError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Merged into live state; `updated` stored entities changed.
    Accepted { updated: usize },
    /// Older than the live value for the same `type_location`.
    Stale,
}

/// Turns push messages into live state, stored entity updates and feed
/// events.
#[derive(Clone)]
pub struct IngestService {
    store: FarmStore,
    live: LiveState,
}

impl IngestService {
    pub fn new(store: FarmStore, live: LiveState) -> Self {
        Self { store, live }
    }

    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        let outcome = match FarmTopic::parse(topic)? {
            FarmTopic::Sensor {
                sensor_type,
                location,
            } => {
                let msg = SensorPayload::parse(payload)?;
                let location = msg.location.clone().unwrap_or(location);
                let reading = msg.reading(sensor_type)?;
                let held = self.live.sensor(sensor_type, &location).await;

                match self
                    .live
                    .merge_sensor(topic, sensor_type, &location, reading.clone())
                    .await
                {
                    MergeOutcome::Stale => IngestOutcome::Stale,
                    MergeOutcome::Accepted { .. } => {
                        let applied = match self
                            .store
                            .apply_pushed_reading(topic, sensor_type, &location, &reading)
                            .await
                        {
                            Ok(applied) => applied,
                            Err(e) => {
                                self.live
                                    .revert_sensor(sensor_type, &location, reading.timestamp, held)
                                    .await;
                                error!(topic, error = %e, "Store update failed; live value reverted");
                                return Err(e.into());
                            }
                        };
                        IngestOutcome::Accepted {
                            updated: applied.len(),
                        }
                    }
                }
            }
            FarmTopic::Actuator {
                actuator_type,
                location,
            } => {
                let msg = ActuatorPayload::parse(payload)?;
                let location = msg.location.clone().unwrap_or(location);
                let state = msg.device_state()?;
                let held = self.live.actuator(actuator_type, &location).await;

                match self
                    .live
                    .merge_actuator(topic, actuator_type, &location, state.clone())
                    .await
                {
                    MergeOutcome::Stale => IngestOutcome::Stale,
                    MergeOutcome::Accepted { .. } => {
                        let changed = match self
                            .store
                            .apply_pushed_state(topic, actuator_type, &location, &state)
                            .await
                        {
                            Ok(changed) => changed,
                            Err(e) => {
                                self.live
                                    .revert_actuator(actuator_type, &location, state.timestamp, held)
                                    .await;
                                error!(topic, error = %e, "Store update failed; live state reverted");
                                return Err(e.into());
                            }
                        };
                        IngestOutcome::Accepted {
                            updated: changed.len(),
                        }
                    }
                }
            }
        };

        match outcome {
            IngestOutcome::Stale => debug!(topic, "Dropped stale push message"),
            IngestOutcome::Accepted { updated } => {
                info!(topic, updated, "Push message accepted");
                let payload: Value = serde_json::from_slice(payload).map_err(PayloadError::from)?;
                self.store.events().publish(topic, payload);
            }
        }
        Ok(outcome)
    }
}
