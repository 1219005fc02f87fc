use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "twin_messages_total",
        "Total shadow and calibration messages received"
    ))
    .unwrap();
    pub static ref PERSISTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "twin_persisted_total",
        "Total state transitions written to the store"
    ))
    .unwrap();
    pub static ref SUPPRESSED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "twin_suppressed_total",
        "Total snapshots skipped because no watched field changed"
    ))
    .unwrap();
    pub static ref REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "twin_rejected_total",
        "Total messages rejected as undecodable or schema-invalid"
    ))
    .unwrap();
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "twin_store_failures_total",
        "Total store calls that failed"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "twin_ingest_latency_seconds",
            "Time taken to handle one transition, whether persisted or suppressed"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PERSISTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SUPPRESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
