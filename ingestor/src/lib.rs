//! Change-detection ingestion and windowed queries for device shadow state.
//!
//! Shadow updates arrive as `previous`/`current` pairs. [`IngestPipeline`]
//! persists a snapshot only when a watched field changed, so devices that
//! report the same state on a fixed interval cost no writes. [`QueryService`]
//! serves the last N seconds of a device's history and per-button calibration
//! bounds from the same [`Store`] abstraction.

pub mod config;
pub mod db;
pub mod detector;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod pipeline;
pub mod query;
pub mod rest;
pub mod schema;
pub mod shadow;
pub mod store;
pub mod timefmt;
pub mod validate;

pub use detector::is_changed;
pub use errors::{Error, IngestError, QueryError, Result, StoreError};
pub use model::{
    CalibrationRecord, CalibrationUpdate, DeviceStateSnapshot, FieldValue, Fields,
    PersistedRecord, StateTransition, WriteOutcome,
};
pub use pipeline::IngestPipeline;
pub use query::QueryService;
pub use schema::{DeploymentSchema, WatchList};
pub use store::{MemoryStore, Store};
