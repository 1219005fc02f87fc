use crate::errors::IngestError;
use crate::model::Fields;
use crate::schema::WatchList;

/// Decides whether `current` is a real state transition away from `previous`.
///
/// Returns `true` when any watched field differs by exact value, or when there
/// is no previous state at all. Fields outside the watch-list never count.
/// A watched field missing from either side is a schema mismatch.
pub fn is_changed(
    previous: Option<&Fields>,
    current: &Fields,
    watched: &WatchList,
) -> Result<bool, IngestError> {
    for name in watched.iter() {
        if !current.contains_key(name) {
            return Err(IngestError::SchemaMismatch(format!(
                "current state is missing watched field {}",
                name
            )));
        }
    }

    let Some(previous) = previous else {
        return Ok(true);
    };

    let mut changed = false;
    for name in watched.iter() {
        let before = previous.get(name).ok_or_else(|| {
            IngestError::SchemaMismatch(format!(
                "previous state is missing watched field {}",
                name
            ))
        })?;
        if current.get(name) != Some(before) {
            changed = true;
        }
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldValue;

    fn fields(temperature: &str, led: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("temperature".to_string(), temperature.into());
        fields.insert("LED3".to_string(), led.into());
        fields.insert("min".to_string(), FieldValue::Int(18));
        fields
    }

    fn watched() -> WatchList {
        WatchList::new(["temperature", "LED3"])
    }

    #[test]
    fn test_identical_state_is_unchanged() {
        let state = fields("20", "red");
        assert!(!is_changed(Some(&state), &state, &watched()).unwrap());
    }

    #[test]
    fn test_each_watched_field_triggers_change() {
        let previous = fields("20", "red");
        assert!(is_changed(Some(&previous), &fields("21", "red"), &watched()).unwrap());
        assert!(is_changed(Some(&previous), &fields("20", "green"), &watched()).unwrap());
    }

    #[test]
    fn test_unwatched_field_is_ignored() {
        let previous = fields("20", "red");
        let mut current = previous.clone();
        current.insert("min".to_string(), FieldValue::Int(10));

        assert!(!is_changed(Some(&previous), &current, &watched()).unwrap());
    }

    #[test]
    fn test_comparison_is_exact() {
        let previous = fields("20", "red");
        assert!(is_changed(Some(&previous), &fields("20.0", "red"), &watched()).unwrap());

        let mut typed = previous.clone();
        typed.insert("temperature".to_string(), FieldValue::Int(20));
        assert!(is_changed(Some(&previous), &typed, &watched()).unwrap());
    }

    #[test]
    fn test_first_observation_is_changed() {
        assert!(is_changed(None, &fields("20", "red"), &watched()).unwrap());
    }

    #[test]
    fn test_missing_watched_field_is_schema_mismatch() {
        let previous = fields("20", "red");
        let mut current = previous.clone();
        current.remove("LED3");

        assert!(matches!(
            is_changed(Some(&previous), &current, &watched()),
            Err(IngestError::SchemaMismatch(_))
        ));
        assert!(matches!(
            is_changed(Some(&current), &previous, &watched()),
            Err(IngestError::SchemaMismatch(_))
        ));
    }
}
