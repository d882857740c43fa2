use std::{
    collections::{BTreeMap, HashMap},
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::FarmStore;
use crate::{
    db::models::{ReadingRecord, Sensor, SensorType},
    error::{FarmError, FarmResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    Day,
    Week,
    Month,
}

impl StatsPeriod {
    pub fn span(self) -> Duration {
        match self {
            StatsPeriod::Day => Duration::days(1),
            StatsPeriod::Week => Duration::days(7),
            StatsPeriod::Month => Duration::days(30),
        }
    }
}

impl FromStr for StatsPeriod {
    type Err = FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(StatsPeriod::Day),
            "week" => Ok(StatsPeriod::Week),
            "month" => Ok(StatsPeriod::Month),
            _ => Err(FarmError::validation(
                "Invalid period parameter. Must be one of: day, week, month",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TypeStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SensorStats {
    pub period: StatsPeriod,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stats: BTreeMap<SensorType, TypeStats>,
}

/// Keeps the newest `limit` records of every sensor, preserving order.
fn trim_per_sensor(records: &mut Vec<ReadingRecord>, limit: usize) {
    let mut seen: HashMap<u64, usize> = HashMap::new();
    let mut keep = vec![false; records.len()];
    for (i, r) in records.iter().enumerate().rev() {
        let n = seen.entry(r.sensor_id).or_default();
        *n += 1;
        keep[i] = *n <= limit;
    }
    let mut flags = keep.into_iter();
    records.retain(|_| flags.next().unwrap_or(false));
}

fn summarize(values: &[(f64, &str)]) -> Option<TypeStats> {
    let (first, unit) = values.first()?;
    let mut min = *first;
    let mut max = *first;
    let mut sum = 0.0;
    for (v, _) in values {
        min = min.min(*v);
        max = max.max(*v);
        sum += v;
    }
    Some(TypeStats {
        min,
        max,
        avg: sum / values.len() as f64,
        count: values.len(),
        unit: (*unit).to_owned(),
    })
}

impl FarmStore {
    pub(crate) async fn append_history(&self, records: Vec<ReadingRecord>) -> FarmResult<()> {
        let limit = self.history_limit();
        self.mutate(|history: &mut Vec<ReadingRecord>| {
            history.extend(records);
            trim_per_sensor(history, limit);
            Ok(())
        })
        .await
    }

    /// History of one sensor, newest first.
    pub async fn sensor_readings(
        &self,
        sensor_id: u64,
        limit: Option<usize>,
    ) -> FarmResult<Vec<ReadingRecord>> {
        self.get_sensor(sensor_id).await?;
        let history: Vec<ReadingRecord> = self.read().await?;
        let mut out: Vec<ReadingRecord> = history
            .into_iter()
            .filter(|r| r.sensor_id == sensor_id)
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Min/max/avg per sensor type over the history inside `period`.
    pub async fn sensor_stats(
        &self,
        period: &str,
        sensor_type: Option<SensorType>,
    ) -> FarmResult<SensorStats> {
        let period: StatsPeriod = period.parse()?;
        let end_time = Utc::now();
        let start_time = end_time - period.span();

        let sensors: Vec<Sensor> = self.read().await?;
        let types: HashMap<u64, SensorType> = sensors
            .iter()
            .filter(|s| sensor_type.is_none_or(|t| s.sensor_type == t))
            .map(|s| (s.id, s.sensor_type))
            .collect();
        if let (Some(t), true) = (sensor_type, types.is_empty()) {
            return Err(FarmError::NotFound(format!("No sensors found with type: {t}")));
        }

        let history: Vec<ReadingRecord> = self.read().await?;
        let mut grouped: BTreeMap<SensorType, Vec<(f64, &str)>> = BTreeMap::new();
        for r in &history {
            if r.timestamp < start_time || r.timestamp > end_time {
                continue;
            }
            if let Some(t) = types.get(&r.sensor_id) {
                grouped.entry(*t).or_default().push((r.value, r.unit.as_str()));
            }
        }

        let stats = grouped
            .into_iter()
            .filter_map(|(t, values)| summarize(&values).map(|s| (t, s)))
            .collect();

        Ok(SensorStats {
            period,
            start_time,
            end_time,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::farm::{input::NewReading, test_support::demo_store};

    fn rec(sensor_id: u64, value: f64) -> ReadingRecord {
        ReadingRecord {
            sensor_id,
            value,
            unit: "%".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn trim_keeps_newest_per_sensor() {
        let mut records = vec![rec(1, 1.0), rec(2, 10.0), rec(1, 2.0), rec(1, 3.0), rec(2, 20.0)];
        trim_per_sensor(&mut records, 2);
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![10.0, 2.0, 3.0, 20.0]);
    }

    #[test]
    fn invalid_period_is_a_validation_error() {
        let err = "year".parse::<StatsPeriod>().unwrap_err();
        assert!(matches!(err, FarmError::Validation(_)));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let store = demo_store(); // limit 50
        for i in 0..60 {
            store
                .add_reading(
                    2,
                    NewReading {
                        value: i as f64,
                        unit: None,
                        timestamp: Some(Utc::now() + Duration::seconds(i)),
                    },
                )
                .await
                .unwrap();
        }
        let history = store.sensor_readings(2, None).await.unwrap();
        assert_eq!(history.len(), 50);
        assert_eq!(history[0].value, 59.0);
        assert_eq!(store.sensor_readings(2, Some(5)).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn stats_group_by_sensor_type() {
        let store = demo_store();
        for (id, v) in [(1, 20.0), (1, 30.0), (2, 50.0)] {
            store
                .add_reading(
                    id,
                    NewReading {
                        value: v,
                        unit: None,
                        timestamp: Some(Utc::now() - Duration::minutes(1)),
                    },
                )
                .await
                .unwrap();
        }

        let stats = store.sensor_stats("day", None).await.unwrap();
        let temp = &stats.stats[&SensorType::Temperature];
        assert_eq!((temp.min, temp.max, temp.avg, temp.count), (20.0, 30.0, 25.0, 2));
        assert_eq!(temp.unit, "°C");
        assert_eq!(stats.stats[&SensorType::Humidity].count, 1);

        let only_humidity = store
            .sensor_stats("week", Some(SensorType::Humidity))
            .await
            .unwrap();
        assert_eq!(only_humidity.stats.len(), 1);
    }

    #[tokio::test]
    async fn stats_for_type_without_sensors_is_not_found() {
        let store = demo_store();
        let err = store.sensor_stats("day", Some(SensorType::Co2)).await.unwrap_err();
        assert_eq!(err.to_string(), "No sensors found with type: co2");
    }
}
