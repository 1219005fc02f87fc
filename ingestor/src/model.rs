use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name under which the derived display timestamp is stored.
pub const DISPLAY_TIMESTAMP_FIELD: &str = "timestamp";

/// Names a history record already uses for its own attributes.
/// Reported fields may not take them.
pub const RESERVED_FIELDS: [&str; 3] = ["deviceId", "time", DISPLAY_TIMESTAMP_FIELD];

/// A single reported value. Devices report either strings or integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Text(_) => FieldKind::Text,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Int,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int => f.write_str("int"),
            FieldKind::Text => f.write_str("text"),
        }
    }
}

/// Reported state fields, ordered by name.
pub type Fields = BTreeMap<String, FieldValue>;

/// One reported-state observation for one device at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateSnapshot {
    pub device_id: String,
    pub observed_at: i64,
    pub fields: Fields,
}

/// The previous and current state of a device as delivered by a shadow update.
///
/// `previous` is `None` for the first report a device ever makes.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub previous: Option<Fields>,
    pub current: DeviceStateSnapshot,
}

/// A history row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub device_id: String,
    #[serde(rename = "time")]
    pub observed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl PersistedRecord {
    /// Rebuild a record from a stored row, lifting the display timestamp out of the fields.
    pub fn from_row(device_id: &str, observed_at: i64, mut fields: Fields) -> Self {
        let timestamp = match fields.remove(DISPLAY_TIMESTAMP_FIELD) {
            Some(FieldValue::Text(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        Self {
            device_id: device_id.to_string(),
            observed_at,
            timestamp,
            fields,
        }
    }
}

/// Per-button temperature bounds. Single mutable row, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalibrationRecord {
    #[serde(skip)]
    pub button_id: i64,
    pub min: i64,
    pub max: i64,
}

/// A calibration write as delivered by a button device.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationUpdate {
    pub button_id: i64,
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    Persisted,
    Suppressed,
}

/// Response body of a window query.
#[derive(Debug, Serialize)]
pub struct WindowResponse {
    pub data: Vec<PersistedRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_decodes_ints_and_strings() {
        let fields: Fields =
            serde_json::from_str(r#"{"temperature": "20", "min": 18}"#).unwrap();
        assert_eq!(fields["temperature"], FieldValue::Text("20".to_string()));
        assert_eq!(fields["min"], FieldValue::Int(18));
    }

    #[test]
    fn test_record_from_row_lifts_timestamp() {
        let mut fields = Fields::new();
        fields.insert("LED3".to_string(), "red".into());
        fields.insert(
            DISPLAY_TIMESTAMP_FIELD.to_string(),
            "1970-01-01 09:16:40".into(),
        );

        let record = PersistedRecord::from_row("tree1", 1000, fields);
        assert_eq!(record.timestamp.as_deref(), Some("1970-01-01 09:16:40"));
        assert!(!record.fields.contains_key(DISPLAY_TIMESTAMP_FIELD));
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut fields = Fields::new();
        fields.insert("temperature".to_string(), "21".into());
        let record = PersistedRecord {
            device_id: "tree1".to_string(),
            observed_at: 1020,
            timestamp: None,
            fields,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"deviceId": "tree1", "time": 1020, "temperature": "21"})
        );
    }
}
