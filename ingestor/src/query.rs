use crate::errors::QueryError;
use crate::model::{CalibrationRecord, PersistedRecord};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Default history window of the reference deployment.
pub const DEFAULT_WINDOW_SECS: i64 = 600;

/// Windowed history reads and calibration lookups.
#[derive(Clone)]
pub struct QueryService {
    history: Arc<dyn Store>,
    calibration: Arc<dyn Store>,
    default_window: i64,
}

impl QueryService {
    pub fn new(history: Arc<dyn Store>, calibration: Arc<dyn Store>) -> Self {
        Self {
            history,
            calibration,
            default_window: DEFAULT_WINDOW_SECS,
        }
    }

    pub fn with_default_window(mut self, window_seconds: i64) -> Self {
        self.default_window = window_seconds;
        self
    }

    pub fn default_window(&self) -> i64 {
        self.default_window
    }

    /// History of `device_id` with `window_end - window_seconds <= time <= window_end`,
    /// oldest first.
    pub async fn query_window(
        &self,
        device_id: &str,
        window_end: i64,
        window_seconds: i64,
    ) -> Result<Vec<PersistedRecord>, QueryError> {
        if window_end <= 0 || window_seconds < 0 {
            return Err(QueryError::InvalidWindow {
                end: window_end,
                window: window_seconds,
            });
        }

        let from = window_end.saturating_sub(window_seconds);
        let rows = self.history.query_range(device_id, from, window_end).await?;
        debug!(device_id, from, to = window_end, rows = rows.len(), "Window query");

        Ok(rows
            .into_iter()
            .map(|(time, fields)| PersistedRecord::from_row(device_id, time, fields))
            .collect())
    }

    /// The configured default window ending now.
    pub async fn query_recent(&self, device_id: &str) -> Result<Vec<PersistedRecord>, QueryError> {
        self.query_window(device_id, Utc::now().timestamp(), self.default_window)
            .await
    }

    /// Current calibration for a button. Absence is not an error.
    pub async fn get_calibration(
        &self,
        button_id: i64,
    ) -> Result<Option<CalibrationRecord>, QueryError> {
        let key = button_id.to_string();
        let Some(fields) = self.calibration.get_item(&key).await? else {
            debug!(button_id, "No calibration stored");
            return Ok(None);
        };

        let bound = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.as_int())
                .ok_or_else(|| QueryError::Corrupt {
                    key: key.clone(),
                    reason: format!("missing integer field {}", name),
                })
        };

        Ok(Some(CalibrationRecord {
            button_id,
            min: bound("min")?,
            max: bound("max")?,
        }))
    }
}
