use crate::detector::is_changed;
use crate::errors::IngestError;
use crate::metrics::{
    INGEST_LATENCY_SECONDS, PERSISTED_TOTAL, STORE_FAILURES_TOTAL, SUPPRESSED_TOTAL,
};
use crate::model::{
    CalibrationUpdate, DeviceStateSnapshot, FieldValue, StateTransition, WriteOutcome,
    DISPLAY_TIMESTAMP_FIELD,
};
use crate::schema::DeploymentSchema;
use crate::store::Store;
use crate::timefmt::display_timestamp;
use crate::validate::{validate, validate_calibration, validate_fields};
use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Decides for each shadow update whether it is worth a write, and performs it.
///
/// Every accepted transition costs exactly one `put` on the history store;
/// a suppressed one costs none. A changed transition whose row is already
/// stored (a redelivery) is suppressed after one read. Store failures are
/// returned unchanged.
#[derive(Clone)]
pub struct IngestPipeline {
    history: Arc<dyn Store>,
    calibration: Arc<dyn Store>,
    schema: Arc<DeploymentSchema>,
    offset: FixedOffset,
}

impl IngestPipeline {
    pub fn new(
        history: Arc<dyn Store>,
        calibration: Arc<dyn Store>,
        schema: DeploymentSchema,
        offset: FixedOffset,
    ) -> Self {
        Self {
            history,
            calibration,
            schema: Arc::new(schema),
            offset,
        }
    }

    pub async fn ingest(&self, transition: StateTransition) -> Result<WriteOutcome, IngestError> {
        let start = Instant::now();
        let StateTransition { previous, current } = transition;

        validate(&self.schema, &current)?;
        if let Some(previous) = &previous {
            validate_fields(&self.schema, previous)?;
        }

        if !is_changed(previous.as_ref(), &current.fields, self.schema.watched())? {
            debug!(
                device_id = %current.device_id,
                observed_at = current.observed_at,
                "State unchanged, write suppressed"
            );
            return Ok(self.suppress(start));
        }

        if self.already_recorded(&current).await? {
            debug!(
                device_id = %current.device_id,
                observed_at = current.observed_at,
                "Transition already recorded, write suppressed"
            );
            return Ok(self.suppress(start));
        }

        let timestamp = display_timestamp(current.observed_at, self.offset)?;
        let mut fields = current.fields;
        fields.insert(
            DISPLAY_TIMESTAMP_FIELD.to_string(),
            FieldValue::Text(timestamp),
        );

        if let Err(e) = self
            .history
            .put(&current.device_id, Some(current.observed_at), fields)
            .await
        {
            STORE_FAILURES_TOTAL.inc();
            warn!(device_id = %current.device_id, "History write failed: {}", e);
            return Err(e.into());
        }

        PERSISTED_TOTAL.inc();
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        info!(
            device_id = %current.device_id,
            observed_at = current.observed_at,
            first_report = previous.is_none(),
            "State transition persisted"
        );

        Ok(WriteOutcome::Persisted)
    }

    fn suppress(&self, start: Instant) -> WriteOutcome {
        SUPPRESSED_TOTAL.inc();
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        WriteOutcome::Suppressed
    }

    /// True when the row at this device and observation time already holds these fields.
    /// Redelivered messages land here.
    async fn already_recorded(&self, current: &DeviceStateSnapshot) -> Result<bool, IngestError> {
        let rows = self
            .history
            .query_range(&current.device_id, current.observed_at, current.observed_at)
            .await
            .map_err(|e| {
                STORE_FAILURES_TOTAL.inc();
                warn!(device_id = %current.device_id, "History read failed: {}", e);
                e
            })?;

        Ok(rows.into_iter().any(|(_, mut stored)| {
            stored.remove(DISPLAY_TIMESTAMP_FIELD);
            stored == current.fields
        }))
    }

    /// Overwrite the calibration row for a button. No change detection applies.
    pub async fn ingest_calibration(
        &self,
        update: CalibrationUpdate,
    ) -> Result<WriteOutcome, IngestError> {
        let (min, max) = validate_calibration(&update.fields)?;
        let key = update.button_id.to_string();

        if let Err(e) = self.calibration.put(&key, None, update.fields).await {
            STORE_FAILURES_TOTAL.inc();
            warn!(button_id = update.button_id, "Calibration write failed: {}", e);
            return Err(e.into());
        }

        info!(button_id = update.button_id, min, max, "Calibration stored");
        Ok(WriteOutcome::Persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Fields;
    use crate::store::MemoryStore;
    use crate::timefmt::parse_offset;

    fn tree_fields(temperature: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("temperature".to_string(), temperature.into());
        fields.insert("LED3".to_string(), "red".into());
        fields.insert("WarmPad".to_string(), "1".into());
        fields.insert("WarmPadState".to_string(), "on".into());
        fields
    }

    fn transition(previous: Option<&str>, current: &str, at: i64) -> StateTransition {
        StateTransition {
            previous: previous.map(tree_fields),
            current: DeviceStateSnapshot {
                device_id: "tree1".to_string(),
                observed_at: at,
                fields: tree_fields(current),
            },
        }
    }

    fn pipeline(history: Arc<MemoryStore>, calibration: Arc<MemoryStore>) -> IngestPipeline {
        IngestPipeline::new(
            history,
            calibration,
            DeploymentSchema::tree_default(),
            parse_offset("+09:00").unwrap(),
        )
    }

    #[test]
    fn test_unchanged_transition_is_suppressed() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let outcome = pipeline.ingest(transition(Some("20"), "20", 1000)).await.unwrap();
            assert_eq!(outcome, WriteOutcome::Suppressed);
            assert_eq!(history.writes(), 0);
        });
    }

    #[test]
    fn test_changed_transition_writes_once_with_timestamp() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let outcome = pipeline.ingest(transition(Some("20"), "21", 1000)).await.unwrap();
            assert_eq!(outcome, WriteOutcome::Persisted);
            assert_eq!(history.writes(), 1);

            let rows = history.query_range("tree1", 1000, 1000).await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(
                rows[0].1.get(DISPLAY_TIMESTAMP_FIELD),
                Some(&FieldValue::Text("1970-01-01 09:16:40".to_string()))
            );
        });
    }

    #[test]
    fn test_redelivered_transition_is_written_once() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let first = pipeline.ingest(transition(Some("20"), "21", 1100)).await.unwrap();
            let again = pipeline.ingest(transition(Some("20"), "21", 1100)).await.unwrap();

            assert_eq!(first, WriteOutcome::Persisted);
            assert_eq!(again, WriteOutcome::Suppressed);
            assert_eq!(history.writes(), 1);
        });
    }

    #[test]
    fn test_different_state_at_same_time_overwrites() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            pipeline.ingest(transition(Some("20"), "21", 1100)).await.unwrap();
            let outcome = pipeline.ingest(transition(Some("20"), "22", 1100)).await.unwrap();

            assert_eq!(outcome, WriteOutcome::Persisted);
            assert_eq!(history.writes(), 2);
            let rows = history.query_range("tree1", 1100, 1100).await.unwrap();
            assert_eq!(rows[0].1["temperature"], FieldValue::Text("22".to_string()));
        });
    }

    #[test]
    fn test_suppressed_decision_records_latency() {
        tokio_test::block_on(async {
            let pipeline = pipeline(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
            let before = INGEST_LATENCY_SECONDS.get_sample_count();

            pipeline.ingest(transition(Some("20"), "20", 1000)).await.unwrap();

            assert!(INGEST_LATENCY_SECONDS.get_sample_count() > before);
        });
    }

    #[test]
    fn test_first_report_is_persisted() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let outcome = pipeline.ingest(transition(None, "20", 1000)).await.unwrap();
            assert_eq!(outcome, WriteOutcome::Persisted);
            assert_eq!(history.writes(), 1);
        });
    }

    #[test]
    fn test_schema_mismatch_touches_no_store() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let mut bad = transition(Some("20"), "21", 1000);
            bad.current.fields.remove("LED3");

            let err = pipeline.ingest(bad).await.unwrap_err();
            assert!(matches!(err, IngestError::SchemaMismatch(_)));
            assert!(!err.is_retryable());
            assert_eq!(history.writes(), 0);
        });
    }

    #[test]
    fn test_invalid_timestamp() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let err = pipeline.ingest(transition(None, "20", -5)).await.unwrap_err();
            assert!(matches!(err, IngestError::InvalidTimestamp(-5)));
        });
    }

    #[test]
    fn test_store_outage_propagates_as_retryable() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            history.set_offline(true);
            let pipeline = pipeline(history.clone(), Arc::new(MemoryStore::new()));

            let err = pipeline.ingest(transition(None, "20", 1000)).await.unwrap_err();
            assert!(err.is_retryable());
        });
    }

    #[test]
    fn test_calibration_is_written_to_its_own_store() {
        tokio_test::block_on(async {
            let history = Arc::new(MemoryStore::new());
            let calibration = Arc::new(MemoryStore::new());
            let pipeline = pipeline(history.clone(), calibration.clone());

            let mut fields = Fields::new();
            fields.insert("min".to_string(), FieldValue::Int(18));
            fields.insert("max".to_string(), FieldValue::Int(24));
            let outcome = pipeline
                .ingest_calibration(CalibrationUpdate { button_id: 7, fields })
                .await
                .unwrap();

            assert_eq!(outcome, WriteOutcome::Persisted);
            assert_eq!(history.writes(), 0);
            assert!(calibration.get_item("7").await.unwrap().is_some());
        });
    }
}
