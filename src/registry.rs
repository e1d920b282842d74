//! Process Parameter Registry
//!
//! Maps human-readable process parameter names to the machine URIs used to
//! read the actual value, write the set value, or write a pair of threshold
//! bounds. Built once from the parameter table and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown process parameter: {0}")]
    NotFound(String),

    #[error("Process parameter {0} has neither a set URI nor threshold URIs")]
    Unsupported(String),

    #[error("Process parameter {name} expects a {expected} value")]
    ValueShape { name: String, expected: &'static str },
}

/// One row of the parameter table, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamRow {
    pub name: String,
    #[serde(default)]
    pub enable: u8,
    #[serde(default)]
    pub path_act_value: String,
    #[serde(default)]
    pub path_set_low_value: String,
    #[serde(default)]
    pub path_set_high_value: String,
    #[serde(default)]
    pub path_set_value: String,
    #[serde(default)]
    pub unit: String,
}

/// Table cells use an empty string or `"0"` for "no URI".
fn uri_cell(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty() && cell != "0").then(|| cell.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessParam {
    pub name: String,
    pub get_uri: Option<String>,
    pub set_uri: Option<String>,
    /// (low, high) bound URIs
    pub threshold: Option<(String, String)>,
    pub unit: String,
}

impl ProcessParam {
    pub fn from_row(row: &ParamRow) -> Self {
        let threshold = match (
            uri_cell(&row.path_set_low_value),
            uri_cell(&row.path_set_high_value),
        ) {
            (Some(low), Some(high)) => Some((low, high)),
            _ => None,
        };
        Self {
            name: row.name.clone(),
            get_uri: uri_cell(&row.path_act_value),
            set_uri: uri_cell(&row.path_set_value),
            threshold,
            unit: row.unit.clone(),
        }
    }

    /// Whether `uri` is any of this parameter's URIs.
    pub fn matches_uri(&self, uri: &str) -> bool {
        self.get_uri.as_deref() == Some(uri)
            || self.set_uri.as_deref() == Some(uri)
            || self
                .threshold
                .as_ref()
                .is_some_and(|(low, high)| low == uri || high == uri)
    }

    /// URIs a write goes to, in write order.
    pub fn write_uris(&self) -> Result<Vec<&str>, RegistryError> {
        if let Some(set) = &self.set_uri {
            Ok(vec![set.as_str()])
        } else if let Some((low, high)) = &self.threshold {
            Ok(vec![low.as_str(), high.as_str()])
        } else {
            Err(RegistryError::Unsupported(self.name.clone()))
        }
    }
}

/// Value written to a process parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessValue {
    Single(String),
    Bounds { low: String, high: String },
}

impl ProcessValue {
    /// Pair each value with the URI it is written to.
    pub fn assign<'a>(
        &'a self,
        param: &'a ProcessParam,
    ) -> Result<Vec<(&'a str, &'a str)>, RegistryError> {
        let uris = param.write_uris()?;
        match (self, uris.as_slice()) {
            (ProcessValue::Single(v), [set]) => Ok(vec![(*set, v.as_str())]),
            (ProcessValue::Bounds { low, high }, [low_uri, high_uri]) => {
                Ok(vec![(*low_uri, low.as_str()), (*high_uri, high.as_str())])
            }
            (_, [_]) => Err(RegistryError::ValueShape {
                name: param.name.clone(),
                expected: "single",
            }),
            _ => Err(RegistryError::ValueShape {
                name: param.name.clone(),
                expected: "low/high bounds",
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParamRegistry {
    params: BTreeMap<String, ProcessParam>,
}

impl ParamRegistry {
    /// Build from table rows; only rows with `enable == 1` are kept.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a ParamRow>,
    {
        let params = rows
            .into_iter()
            .filter(|row| row.enable == 1)
            .map(|row| (row.name.clone(), ProcessParam::from_row(row)))
            .collect();
        Self { params }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessParam> {
        self.params.values()
    }

    pub fn resolve(&self, name: &str) -> Result<&ProcessParam, RegistryError> {
        self.params
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Name of the parameter owning `uri`. Linear scan.
    pub fn find_by_uri(&self, uri: &str) -> Option<&str> {
        self.params
            .values()
            .find(|p| p.matches_uri(uri))
            .map(|p| p.name.as_str())
    }

    /// Actual-value URIs of every parameter that has one. This is the default
    /// read set of a machine acquisition.
    pub fn get_uris(&self) -> Vec<String> {
        self.params
            .values()
            .filter_map(|p| p.get_uri.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, enable: u8, act: &str, low: &str, high: &str, set: &str) -> ParamRow {
        ParamRow {
            name: name.to_string(),
            enable,
            path_act_value: act.to_string(),
            path_set_low_value: low.to_string(),
            path_set_high_value: high.to_string(),
            path_set_value: set.to_string(),
            unit: "bar".to_string(),
        }
    }

    fn registry() -> ParamRegistry {
        let rows = vec![
            row("pressure", 1, "act/p", "0", "0", "set/p"),
            row("cushion", 1, "act/c", "lim/c_lo", "lim/c_hi", ""),
            row("temp", 0, "act/t", "", "", "set/t"),
            row("readonly", 1, "act/r", "", "", "0"),
        ];
        ParamRegistry::from_rows(&rows)
    }

    #[test]
    fn test_disabled_rows_are_excluded() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.resolve("temp"), Err(RegistryError::NotFound("temp".to_string())));
    }

    #[test]
    fn test_zero_and_empty_cells_are_absent() {
        let reg = registry();
        let pressure = reg.resolve("pressure").unwrap();
        assert_eq!(pressure.set_uri.as_deref(), Some("set/p"));
        assert!(pressure.threshold.is_none());

        let readonly = reg.resolve("readonly").unwrap();
        assert!(readonly.set_uri.is_none());
        assert_eq!(
            readonly.write_uris(),
            Err(RegistryError::Unsupported("readonly".to_string()))
        );
    }

    #[test]
    fn test_reverse_lookup_covers_all_uris() {
        let reg = registry();
        assert_eq!(reg.find_by_uri("act/p"), Some("pressure"));
        assert_eq!(reg.find_by_uri("set/p"), Some("pressure"));
        assert_eq!(reg.find_by_uri("lim/c_hi"), Some("cushion"));
        assert_eq!(reg.find_by_uri("act/t"), None);
    }

    #[test]
    fn test_value_shape_must_match_param() {
        let reg = registry();
        let cushion = reg.resolve("cushion").unwrap();

        let bounds = ProcessValue::Bounds {
            low: "1".to_string(),
            high: "9".to_string(),
        };
        assert_eq!(
            bounds.assign(cushion).unwrap(),
            vec![("lim/c_lo", "1"), ("lim/c_hi", "9")]
        );
        assert!(matches!(
            ProcessValue::Single("5".to_string()).assign(cushion),
            Err(RegistryError::ValueShape { .. })
        ));
    }

    #[test]
    fn test_default_read_set() {
        let mut uris = registry().get_uris();
        uris.sort();
        assert_eq!(uris, vec!["act/c", "act/p", "act/r"]);
    }
}
