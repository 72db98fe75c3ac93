//! The generic document produced by decoders and consumed by encoders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WodResult;
use crate::value::Value;
use crate::vocab::{row_size_key, PRIMARY_INVESTIGATOR, PRIMARY_INVESTIGATOR_VAR};

/// File-level attributes by name.
pub type GlobalAttributes = BTreeMap<String, Value>;

/// One profile: field name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cast(pub BTreeMap<String, Value>);

impl Cast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Samples this cast contributes to a packed field (absent or Null is 0).
    pub fn row_size(&self, field: &str) -> Option<usize> {
        match self.get(&row_size_key(field)) {
            None | Some(Value::Null) => Some(0),
            Some(value) => value.as_count(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Cast {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Cast(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Parallel investigator name and role arrays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvestigatorInfo {
    #[serde(rename = "Primary_Investigator", default)]
    pub names: Vec<String>,

    #[serde(rename = "Primary_Investigator_VAR", default)]
    pub variables: Vec<String>,
}

impl InvestigatorInfo {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.variables.is_empty()
    }

    /// Number of investigator rows.
    pub fn len(&self) -> usize {
        self.names.len().max(self.variables.len())
    }

    /// Entries by container variable name.
    pub fn columns(&self) -> [(&'static str, &[String]); 2] {
        [
            (PRIMARY_INVESTIGATOR, self.names.as_slice()),
            (PRIMARY_INVESTIGATOR_VAR, self.variables.as_slice()),
        ]
    }
}

/// A decoded file: global attributes, ordered casts and optional
/// investigator info. Cast order addresses the packed observation arrays.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub global_attributes: GlobalAttributes,

    #[serde(default)]
    pub casts: Vec<Cast>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_investigator_info: Option<InvestigatorInfo>,
}

impl Document {
    pub fn from_json_str(json: &str) -> WodResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> WodResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "global_attributes": {"institution": "NOAA"},
            "casts": [{"lat": 35.5, "Temperature": [10.0, null], "Temperature_row_size": 2}],
            "primary_investigator_info": {
                "Primary_Investigator": ["SMITH"],
                "Primary_Investigator_VAR": ["all_variables"]
            }
        }"#;
        let doc = Document::from_json_str(json).unwrap();
        assert_eq!(
            doc.global_attributes.get("institution"),
            Some(&Value::Text("NOAA".into()))
        );
        let cast = &doc.casts[0];
        assert_eq!(cast.row_size("Temperature"), Some(2));
        assert_eq!(cast.row_size("Salinity"), Some(0));
        assert_eq!(
            cast.get("Temperature"),
            Some(&Value::Sequence(vec![Value::Float(10.0), Value::Null]))
        );
        let info = doc.primary_investigator_info.as_ref().unwrap();
        assert_eq!(info.names, vec!["SMITH"]);
        assert_eq!(info.len(), 1);

        let reparsed = Document::from_json_str(&doc.to_json_pretty().unwrap()).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_missing_sections_default() {
        let doc = Document::from_json_str(r#"{"casts": []}"#).unwrap();
        assert!(doc.global_attributes.is_empty());
        assert!(doc.primary_investigator_info.is_none());
        let json = doc.to_json_pretty().unwrap();
        assert!(!json.contains("primary_investigator_info"));
    }

    #[test]
    fn test_invalid_row_size() {
        let cast: Cast = [("z_row_size", Value::Integer(-2))].into_iter().collect();
        assert_eq!(cast.row_size("z"), None);
    }
}
