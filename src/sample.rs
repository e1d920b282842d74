//! Sample data model
//!
//! A [`Sample`] is one timestamped snapshot of one or more parameter values
//! taken from a single device. Values are keyed by wire URI straight out of the
//! protocol client, or by logical parameter name once translated through the
//! [`ParamRegistry`](crate::registry::ParamRegistry).
//!
//! When handed to callers a sample is flattened into a record that carries one
//! synthetic `timestamp_<device>` entry next to the measured values.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format of the flattened `timestamp_<device>` entry (millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Prefix of the synthetic timestamp key.
pub const TIMESTAMP_KEY_PREFIX: &str = "timestamp_";

/// Drained samples, one ordered sequence of values per key.
pub type SampleSeries = BTreeMap<String, Vec<SampleValue>>;

// ============================================================================
// Sample Value
// ============================================================================

/// A single parameter value as reported by a device.
///
/// The machine controller returns strings; analog inputs produce numbers.
/// `Null` marks a value that was requested but not delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
    Null,
}

impl SampleValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SampleValue::Null)
    }

    /// Numeric view of the value. Text is parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::Number(v) => Some(*v),
            SampleValue::Text(s) => s.trim().parse().ok(),
            SampleValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SampleValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleValue::Number(v) => write!(f, "{}", v),
            SampleValue::Text(s) => write!(f, "{}", s),
            SampleValue::Null => write!(f, "null"),
        }
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Number(v)
    }
}

impl From<String> for SampleValue {
    fn from(s: String) -> Self {
        SampleValue::Text(s)
    }
}

impl From<&str> for SampleValue {
    fn from(s: &str) -> Self {
        SampleValue::Text(s.to_string())
    }
}

impl From<Option<String>> for SampleValue {
    fn from(v: Option<String>) -> Self {
        v.map_or(SampleValue::Null, SampleValue::Text)
    }
}

// ============================================================================
// Sample
// ============================================================================

/// One timestamped snapshot from one device. Immutable once produced; the
/// builder-style methods consume and return the sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    device: String,
    timestamp: DateTime<Local>,
    values: BTreeMap<String, SampleValue>,
}

impl Sample {
    pub fn new(device: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            device: device.into(),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// A sample in which every requested key maps to `Null`.
    ///
    /// Produced when a read round trip completed but its payload was unusable.
    pub fn unavailable<I, K>(device: impl Into<String>, keys: I, timestamp: DateTime<Local>) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut sample = Self::new(device, timestamp);
        for key in keys {
            sample.values.insert(key.into(), SampleValue::Null);
        }
        sample
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<SampleValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn values(&self) -> &BTreeMap<String, SampleValue> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&SampleValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when at least one value was actually delivered.
    pub fn has_data(&self) -> bool {
        self.values.values().any(|v| !v.is_null())
    }

    /// Key of the synthetic timestamp entry, `timestamp_<device>`.
    pub fn timestamp_key(&self) -> String {
        format!("{}{}", TIMESTAMP_KEY_PREFIX, self.device)
    }

    /// Rename keys for which `lookup` returns a new name; other keys are kept.
    pub fn relabel<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values = self
            .values
            .into_iter()
            .map(|(key, value)| match lookup(&key) {
                Some(name) => (name, value),
                None => (key, value),
            })
            .collect();
        Self { values, ..self }
    }

    /// Flatten into the caller-facing mapping including `timestamp_<device>`.
    pub fn to_record(&self) -> BTreeMap<String, SampleValue> {
        let mut record = self.values.clone();
        record.insert(
            self.timestamp_key(),
            SampleValue::Text(self.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        );
        record
    }
}

/// Midpoint of a request interval, used as the reported sample time so that
/// network and processing latency are split evenly.
pub fn midpoint(start: DateTime<Local>, end: DateTime<Local>) -> DateTime<Local> {
    start + (end - start) / 2
}

/// Merge samples into one sequence per key, preserving sample order.
pub fn collect_series<I>(samples: I) -> SampleSeries
where
    I: IntoIterator<Item = Sample>,
{
    let mut series = SampleSeries::new();
    for sample in samples {
        for (key, value) in sample.to_record() {
            series.entry(key).or_default().push(value);
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_contains_timestamp_entry() {
        let ts = Local::now();
        let sample = Sample::new("imm", ts).with_value("p", "42.0");
        let record = sample.to_record();

        assert_eq!(record.len(), 2);
        assert_eq!(record.get("p"), Some(&SampleValue::Text("42.0".to_string())));
        let stamp = record.get("timestamp_imm").and_then(SampleValue::as_str).unwrap();
        assert_eq!(stamp, ts.format(TIMESTAMP_FORMAT).to_string());
    }

    #[test]
    fn test_midpoint_splits_interval() {
        let start = Local::now();
        let end = start + Duration::milliseconds(200);
        assert_eq!(midpoint(start, end), start + Duration::milliseconds(100));
        assert_eq!(midpoint(start, start), start);
    }

    #[test]
    fn test_unavailable_maps_every_key_to_null() {
        let sample = Sample::unavailable("imm", ["a", "b"], Local::now());
        assert_eq!(sample.len(), 2);
        assert!(!sample.has_data());
        assert!(sample.values().values().all(SampleValue::is_null));
    }

    #[test]
    fn test_relabel_keeps_unknown_keys() {
        let sample = Sample::new("imm", Local::now())
            .with_value("uri/a", 1.0)
            .with_value("uri/b", 2.0)
            .relabel(|k| (k == "uri/a").then(|| "force".to_string()));

        assert_eq!(sample.get("force"), Some(&SampleValue::Number(1.0)));
        assert_eq!(sample.get("uri/b"), Some(&SampleValue::Number(2.0)));
        assert!(sample.get("uri/a").is_none());
    }

    #[test]
    fn test_collect_series_preserves_order() {
        let t0 = Local::now();
        let samples = vec![
            Sample::new("revpi", t0).with_value("force_kN", 1.0),
            Sample::new("revpi", t0 + Duration::seconds(1)).with_value("force_kN", 2.0),
        ];
        let series = collect_series(samples);

        assert_eq!(
            series.get("force_kN"),
            Some(&vec![SampleValue::Number(1.0), SampleValue::Number(2.0)])
        );
        assert_eq!(series.get("timestamp_revpi").map(Vec::len), Some(2));
    }

    #[test]
    fn test_value_numeric_view() {
        assert_eq!(SampleValue::from("12.5").as_f64(), Some(12.5));
        assert_eq!(SampleValue::from(3.0).as_f64(), Some(3.0));
        assert_eq!(SampleValue::Null.as_f64(), None);
        assert_eq!(SampleValue::from(None::<String>), SampleValue::Null);
    }
}
