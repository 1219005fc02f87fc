//! Transport payloads delivered by the device shadow service.

use crate::errors::{Error, Result};
use crate::model::{CalibrationUpdate, DeviceStateSnapshot, Fields, StateTransition};
use serde::{Deserialize, Serialize};

/// A shadow update document: the full state before and after one update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowDocument {
    pub device: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<ShadowState>,
    pub current: ShadowState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowState {
    pub state: StateSections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(
        default,
        rename = "clientToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_token: Option<String>,
}

/// Only `reported` takes part in ingestion; `desired` is carried but ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSections {
    #[serde(default)]
    pub reported: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Fields>,
}

impl ShadowDocument {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Decode(format!("shadow document: {}", e)))
    }

    pub fn into_transition(self) -> StateTransition {
        StateTransition {
            previous: self.previous.map(|p| p.state.reported),
            current: DeviceStateSnapshot {
                device_id: self.device,
                observed_at: self.timestamp,
                fields: self.current.state.reported,
            },
        }
    }
}

/// A calibration write from a control button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDocument {
    #[serde(rename = "buttonID")]
    pub button_id: i64,
    pub state: StateSections,
}

impl CalibrationDocument {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("calibration document: {}", e)))
    }

    pub fn into_update(self) -> CalibrationUpdate {
        CalibrationUpdate {
            button_id: self.button_id,
            fields: self.state.reported,
        }
    }
}
