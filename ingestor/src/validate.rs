use crate::errors::IngestError;
use crate::model::{DeviceStateSnapshot, Fields};
use crate::schema::DeploymentSchema;

/// Checks that a field set matches the deployment schema exactly.
pub fn validate_fields(schema: &DeploymentSchema, fields: &Fields) -> Result<(), IngestError> {
    for (name, kind) in schema.fields() {
        match fields.get(name) {
            None => {
                return Err(IngestError::SchemaMismatch(format!(
                    "missing field {}",
                    name
                )))
            }
            Some(value) if value.kind() != kind => {
                return Err(IngestError::SchemaMismatch(format!(
                    "field {} is {}, expected {}",
                    name,
                    value.kind(),
                    kind
                )))
            }
            Some(_) => {}
        }
    }

    if let Some(extra) = fields.keys().find(|name| schema.kind_of(name).is_none()) {
        return Err(IngestError::SchemaMismatch(format!(
            "undeclared field {}",
            extra
        )));
    }

    Ok(())
}

/// Validates a snapshot's identity, timestamp and fields.
pub fn validate(
    schema: &DeploymentSchema,
    snapshot: &DeviceStateSnapshot,
) -> Result<(), IngestError> {
    if snapshot.device_id.is_empty() {
        return Err(IngestError::SchemaMismatch(
            "Device ID cannot be empty".to_string(),
        ));
    }

    if snapshot.observed_at <= 0 {
        return Err(IngestError::InvalidTimestamp(snapshot.observed_at));
    }

    validate_fields(schema, &snapshot.fields)
}

/// Checks a calibration write carries integer bounds with `min <= max`.
pub fn validate_calibration(fields: &Fields) -> Result<(i64, i64), IngestError> {
    let bound = |name: &str| -> Result<i64, IngestError> {
        fields
            .get(name)
            .ok_or_else(|| IngestError::SchemaMismatch(format!("missing field {}", name)))?
            .as_int()
            .ok_or_else(|| IngestError::SchemaMismatch(format!("field {} must be an integer", name)))
    };

    let min = bound("min")?;
    let max = bound("max")?;
    if min > max {
        return Err(IngestError::SchemaMismatch(format!(
            "min {} exceeds max {}",
            min, max
        )));
    }

    Ok((min, max))
}
