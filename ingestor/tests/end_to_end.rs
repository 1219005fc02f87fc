use std::sync::Arc;
use twin_ingestor::timefmt::parse_offset;
use twin_ingestor::{
    CalibrationUpdate, DeploymentSchema, DeviceStateSnapshot, FieldValue, Fields,
    IngestPipeline, MemoryStore, QueryService, StateTransition, WriteOutcome,
};

struct Harness {
    history: Arc<MemoryStore>,
    calibration: Arc<MemoryStore>,
    pipeline: IngestPipeline,
    queries: QueryService,
}

impl Harness {
    fn new() -> Self {
        let history = Arc::new(MemoryStore::new());
        let calibration = Arc::new(MemoryStore::new());
        let pipeline = IngestPipeline::new(
            history.clone(),
            calibration.clone(),
            DeploymentSchema::tree_default(),
            parse_offset("+09:00").unwrap(),
        );
        let queries = QueryService::new(history.clone(), calibration.clone());
        Self {
            history,
            calibration,
            pipeline,
            queries,
        }
    }
}

fn reported(temperature: &str, led: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("temperature".to_string(), temperature.into());
    fields.insert("LED3".to_string(), led.into());
    fields.insert("WarmPad".to_string(), "1".into());
    fields.insert("WarmPadState".to_string(), "off".into());
    fields
}

fn transition(previous: Option<Fields>, current: Fields, at: i64) -> StateTransition {
    StateTransition {
        previous,
        current: DeviceStateSnapshot {
            device_id: "tree1".to_string(),
            observed_at: at,
            fields: current,
        },
    }
}

#[tokio::test]
async fn test_tree_scenario_persists_only_changes() {
    let h = Harness::new();

    let a = reported("20", "red");
    let outcome = h.pipeline.ingest(transition(None, a.clone(), 1000)).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Persisted);
    assert_eq!(h.history.len("tree1"), 1);

    let b = reported("20", "red");
    let outcome = h
        .pipeline
        .ingest(transition(Some(a), b.clone(), 1010))
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Suppressed);
    assert_eq!(h.history.len("tree1"), 1);

    let c = reported("21", "red");
    let outcome = h.pipeline.ingest(transition(Some(b), c, 1020)).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Persisted);
    assert_eq!(h.history.len("tree1"), 2);

    let records = h.queries.query_window("tree1", 1020, 600).await.unwrap();
    let times: Vec<i64> = records.iter().map(|r| r.observed_at).collect();
    assert_eq!(times, vec![1000, 1020]);
    assert_eq!(
        records[1].fields["temperature"],
        FieldValue::Text("21".to_string())
    );
    assert_eq!(records[0].timestamp.as_deref(), Some("1970-01-01 09:16:40"));
}

#[tokio::test]
async fn test_repeated_current_writes_at_most_once() {
    let h = Harness::new();
    let red = reported("20", "red");
    let green = reported("20", "green");

    h.pipeline
        .ingest(transition(Some(red), green.clone(), 1000))
        .await
        .unwrap();
    // The shadow now reports the same state again, with the last one as previous.
    let outcome = h
        .pipeline
        .ingest(transition(Some(green.clone()), green, 1010))
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Suppressed);
    assert_eq!(h.history.writes(), 1);
}

#[tokio::test]
async fn test_redelivered_transition_writes_once() {
    let h = Harness::new();
    let changed = transition(Some(reported("20", "red")), reported("20", "green"), 1100);

    let first = h.pipeline.ingest(changed.clone()).await.unwrap();
    let again = h.pipeline.ingest(changed).await.unwrap();

    assert_eq!(first, WriteOutcome::Persisted);
    assert_eq!(again, WriteOutcome::Suppressed);
    assert_eq!(h.history.writes(), 1);
    assert_eq!(h.history.len("tree1"), 1);
}

#[tokio::test]
async fn test_devices_are_partitioned() {
    let h = Harness::new();
    let mut other = transition(None, reported("5", "blue"), 1000);
    other.current.device_id = "tree2".to_string();

    h.pipeline.ingest(transition(None, reported("20", "red"), 1000)).await.unwrap();
    h.pipeline.ingest(other).await.unwrap();

    let records = h.queries.query_window("tree2", 1000, 600).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, "tree2");
}

#[tokio::test]
async fn test_calibration_last_write_wins() {
    let h = Harness::new();

    for (min, max) in [(10, 30), (18, 24)] {
        let mut fields = Fields::new();
        fields.insert("min".to_string(), FieldValue::Int(min));
        fields.insert("max".to_string(), FieldValue::Int(max));
        fields.insert("LED".to_string(), "red".into());
        h.pipeline
            .ingest_calibration(CalibrationUpdate { button_id: 7, fields })
            .await
            .unwrap();
    }

    let record = h.queries.get_calibration(7).await.unwrap().unwrap();
    assert_eq!((record.min, record.max), (18, 24));
    assert!(h.queries.get_calibration(8).await.unwrap().is_none());
    assert_eq!(h.calibration.writes(), 2);
    assert_eq!(h.history.writes(), 0);
}

#[tokio::test]
async fn test_concurrent_devices_ingest_independently() {
    let h = Arc::new(Harness::new());
    let mut handles = Vec::new();

    for n in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let mut t = transition(None, reported("20", "red"), 1000 + n);
            t.current.device_id = format!("tree{}", n);
            h.pipeline.ingest(t).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), WriteOutcome::Persisted);
    }
    assert_eq!(h.history.writes(), 8);
}
