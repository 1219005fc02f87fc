use serde::Serialize;

/// Reported state of one simulated tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeState {
    pub temperature: String,
    #[serde(rename = "LED3")]
    pub led3: String,
    #[serde(rename = "WarmPad")]
    pub warm_pad: String,
    #[serde(rename = "WarmPadState")]
    pub warm_pad_state: String,
}

#[derive(Debug, Serialize)]
pub struct Reported<'a> {
    pub reported: &'a TreeState,
}

#[derive(Debug, Serialize)]
pub struct ShadowState<'a> {
    pub state: Reported<'a>,
    #[serde(rename = "clientToken")]
    pub client_token: String,
}

/// Shadow update document as published on `shadow/<device>/documents`.
#[derive(Debug, Serialize)]
pub struct ShadowDocument<'a> {
    pub device: &'a str,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<ShadowState<'a>>,
    pub current: ShadowState<'a>,
}

#[derive(Debug, Serialize)]
pub struct CalibrationBounds {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Serialize)]
pub struct CalibrationState {
    pub reported: CalibrationBounds,
}

/// Calibration write as published on `calibration/<button>`.
#[derive(Debug, Serialize)]
pub struct CalibrationDocument {
    #[serde(rename = "buttonID")]
    pub button_id: i64,
    pub state: CalibrationState,
}
