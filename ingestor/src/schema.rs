//! Static per-deployment field schema and watch-list.

use crate::errors::IngestError;
use crate::model::{FieldKind, RESERVED_FIELDS};
use std::collections::{BTreeMap, BTreeSet};

/// Names of the fields whose change triggers persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList(BTreeSet<String>);

impl WatchList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The fixed set of reported fields for a deployment and which of them are watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSchema {
    fields: BTreeMap<String, FieldKind>,
    watched: WatchList,
}

impl DeploymentSchema {
    /// Build a schema, rejecting reserved field names and a watch-list that
    /// names undeclared fields.
    pub fn new(
        fields: impl IntoIterator<Item = (String, FieldKind)>,
        watched: WatchList,
    ) -> Result<Self, IngestError> {
        let fields: BTreeMap<String, FieldKind> = fields.into_iter().collect();
        for name in fields.keys() {
            check_not_reserved(name)?;
        }
        if let Some(unknown) = watched.iter().find(|name| !fields.contains_key(*name)) {
            return Err(IngestError::SchemaMismatch(format!(
                "watched field {} is not declared in the schema",
                unknown
            )));
        }
        Ok(Self { fields, watched })
    }

    /// The Christmas-tree deployment: temperature, tri-colour LED, warm-pad setpoint and state.
    pub fn tree_default() -> Self {
        let names = ["temperature", "LED3", "WarmPad", "WarmPadState"];
        Self {
            fields: names
                .iter()
                .map(|n| (n.to_string(), FieldKind::Text))
                .collect(),
            watched: WatchList::new(names),
        }
    }

    /// Parse a `name:kind,name:kind` list. A bare name defaults to text.
    pub fn parse_fields(list: &str) -> Result<Vec<(String, FieldKind)>, IngestError> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, kind) = match entry.split_once(':') {
                    Some((name, kind)) => (name.trim(), kind.trim()),
                    None => (entry, "text"),
                };
                check_not_reserved(name)?;
                let kind = match kind.to_ascii_lowercase().as_str() {
                    "text" | "string" => FieldKind::Text,
                    "int" | "integer" => FieldKind::Int,
                    other => {
                        return Err(IngestError::SchemaMismatch(format!(
                            "unknown kind {} for field {}",
                            other, name
                        )))
                    }
                };
                Ok((name.to_string(), kind))
            })
            .collect()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    pub fn watched(&self) -> &WatchList {
        &self.watched
    }
}

fn check_not_reserved(name: &str) -> Result<(), IngestError> {
    if RESERVED_FIELDS.iter().any(|reserved| *reserved == name) {
        return Err(IngestError::SchemaMismatch(format!(
            "field name {} is reserved",
            name
        )));
    }
    Ok(())
}
