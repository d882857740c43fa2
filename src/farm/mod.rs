//! Typed access to the farm collections held in a [`KvStore`].
//!
//! Each collection is one JSON document. Every mutation loads the whole
//! document, edits it in memory and writes the whole document back while
//! holding the store's write lock. A closure that returns an error leaves the
//! stored document untouched.

pub mod actuators;
pub mod alerts;
pub mod dashboard;
pub mod filter;
pub mod input;
pub mod readings;
pub mod seed;
pub mod sensors;
pub mod users;

use std::{collections::BTreeMap, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::FarmResult,
    realtime::feed::EventHub,
    store::{KvStore, StoreError},
};

pub use filter::{ActuatorFilter, AlertFilter, SensorFilter};

/// A document stored under a fixed key.
pub trait Collection: Serialize + DeserializeOwned + Default + Send {
    const KEY: &'static str;

    /// Contents written the first time the key is read with seeding enabled.
    fn demo() -> Self {
        Self::default()
    }
}

#[derive(Clone)]
pub struct FarmStore {
    inner: Arc<Inner>,
}

struct Inner {
    kv: Arc<dyn KvStore>,
    write: Mutex<()>,
    seed_demo_data: bool,
    history_limit: usize,
    events: EventHub,
}

impl FarmStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        seed_demo_data: bool,
        history_limit: usize,
        events: EventHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kv,
                write: Mutex::new(()),
                seed_demo_data,
                history_limit: history_limit.max(1),
                events,
            }),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub(crate) fn history_limit(&self) -> usize {
        self.inner.history_limit
    }

    async fn load<C: Collection>(&self) -> Result<Option<C>, StoreError> {
        let Some(raw) = self.inner.kv.get(C::KEY).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: C::KEY.to_owned(),
                source,
            })
    }

    async fn save<C: Collection>(&self, value: &C) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Corrupt {
            key: C::KEY.to_owned(),
            source,
        })?;
        self.inner.kv.set(C::KEY, raw).await
    }

    /// Loads the collection, seeding it when absent. Must be called with the
    /// write lock held if the result is going to be written back.
    async fn load_or_seed<C: Collection>(&self) -> Result<(C, bool), StoreError> {
        match self.load::<C>().await? {
            Some(c) => Ok((c, false)),
            None if self.inner.seed_demo_data => Ok((C::demo(), true)),
            None => Ok((C::default(), false)),
        }
    }

    /// Current contents of a collection. Seeded defaults are persisted on
    /// first read.
    pub(crate) async fn read<C: Collection>(&self) -> FarmResult<C> {
        if let Some(c) = self.load::<C>().await? {
            return Ok(c);
        }

        let _guard = self.inner.write.lock().await;
        let (value, seeded) = self.load_or_seed::<C>().await?;
        if seeded {
            self.save(&value).await?;
            info!(key = C::KEY, "Seeded collection with demo data");
        }
        Ok(value)
    }

    /// Read-modify-write of a whole collection under the write lock.
    pub(crate) async fn mutate<C, R, F>(&self, f: F) -> FarmResult<R>
    where
        C: Collection,
        F: FnOnce(&mut C) -> FarmResult<R>,
    {
        let _guard = self.inner.write.lock().await;
        let (mut value, _) = self.load_or_seed::<C>().await?;
        let out = f(&mut value)?;
        self.save(&value).await?;
        debug!(key = C::KEY, "Collection saved");
        Ok(out)
    }

    /// Every key and its parsed document. Undecodable documents are kept as
    /// JSON strings so a snapshot never loses data.
    pub async fn snapshot(&self) -> FarmResult<BTreeMap<String, serde_json::Value>> {
        let _guard = self.inner.write.lock().await;
        let mut out = BTreeMap::new();
        for key in self.inner.kv.keys().await? {
            let Some(raw) = self.inner.kv.get(&key).await? else {
                continue;
            };
            let value = serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Snapshotting undecodable document as text");
                serde_json::Value::String(raw)
            });
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Writes every document in `snapshot`. Keys not in the snapshot are left
    /// alone.
    pub async fn restore(&self, snapshot: &BTreeMap<String, serde_json::Value>) -> FarmResult<usize> {
        let _guard = self.inner.write.lock().await;
        for (key, value) in snapshot {
            let raw = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.inner.kv.set(key, raw).await?;
        }
        Ok(snapshot.len())
    }
}

pub(crate) fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().unwrap_or(0) + 1
}

/// Indices of the entities a push event on `topic` addresses. Entities whose
/// `mqtt_topic` equals the topic win; otherwise fall back to entities for
/// which `same_type_and_location` holds.
pub(crate) fn push_targets<T>(
    items: &[T],
    topic: &str,
    mqtt_topic: impl Fn(&T) -> Option<&str>,
    same_type_and_location: impl Fn(&T) -> bool,
) -> Vec<usize> {
    let by_topic: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| mqtt_topic(item) == Some(topic))
        .map(|(i, _)| i)
        .collect();
    if !by_topic.is_empty() {
        return by_topic;
    }
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| same_type_and_location(item))
        .map(|(i, _)| i)
        .collect()
}

pub(crate) fn same_location(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

pub(crate) fn require_text(field: &str, value: &str) -> FarmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::error::FarmError::validation(format!(
            "Missing required field: {field}"
        )));
    }
    Ok(trimmed.to_owned())
}
