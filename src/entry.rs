//! Immutable row snapshots and their primary-key identity.

use crate::error::{Result, SyncError};
use crate::schema::TableSchema;
use crate::value::Value;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;

/// The primary-key tuple identifying one logical row.
///
/// Two entries with equal key tuples are the same logical row at different
/// points in time. Values are in primary-key field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey(pub Vec<Value>);

impl EntryKey {
    /// True when `prefix` matches the leading components of this key.
    pub fn starts_with(&self, prefix: &[Value]) -> bool {
        prefix.len() <= self.0.len() && self.0[..prefix.len()] == *prefix
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for EntryKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// An immutable snapshot of one row.
///
/// Entries are never mutated in place — a change produces a new `Entry` —
/// so they are shared as `Arc<Entry>` between the store, callbacks and any
/// snapshots the caller holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    values: HashMap<String, Value>,
}

impl Entry {
    /// Decode a raw JSON row into a typed entry using the table schema.
    ///
    /// Each schema field is coerced by its declared type; fields missing
    /// from the row become NULL. Fields in the row but not in the schema are
    /// ignored (the schema is fixed for the session).
    pub fn from_row(schema: &TableSchema, row: &JsonMap<String, JsonValue>) -> Result<Self> {
        let mut values = HashMap::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let value = match row.get(&field.name) {
                Some(raw) => field.pg_type.coerce(field.dims, raw).map_err(|e| {
                    SyncError::Decode(format!(
                        "table '{}' field '{}': {}",
                        schema.name, field.name, e
                    ))
                })?,
                None => Value::Null,
            };
            values.insert(field.name.clone(), value);
        }
        Ok(Self { values })
    }

    /// Compute this entry's primary-key tuple.
    ///
    /// Fails when a key component is NULL or missing — such a row cannot be
    /// cached.
    pub fn key(&self, schema: &TableSchema) -> Result<EntryKey> {
        let mut parts = Vec::with_capacity(schema.primary_key.len());
        for name in &schema.primary_key {
            match self.values.get(name) {
                Some(value) if !value.is_null() => parts.push(value.clone()),
                _ => {
                    return Err(SyncError::Decode(format!(
                        "table '{}': primary-key field '{}' is null or missing",
                        schema.name, name
                    )));
                },
            }
        }
        Ok(EntryKey(parts))
    }

    /// Field accessor.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Iterate over field name / value pairs (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the entry holds no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render the entry back into a JSON object (schema field values only).
    pub fn to_json(&self) -> JsonValue {
        let map: JsonMap<String, JsonValue> =
            self.values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
        JsonValue::Object(map)
    }
}

/// Filter for synchronous snapshot reads of a table.
#[derive(Debug, Clone, Default)]
pub enum SnapshotFilter {
    /// All entries.
    #[default]
    All,
    /// Entries whose primary-key tuple starts with the given values.
    KeyPrefix(Vec<Value>),
    /// Entries where every listed field equals the given value.
    Fields(Vec<(String, Value)>),
}

impl SnapshotFilter {
    /// Field-equality filter on a single field.
    pub fn field_eq(name: impl Into<String>, value: impl Into<Value>) -> Self {
        SnapshotFilter::Fields(vec![(name.into(), value.into())])
    }

    /// Key-prefix filter.
    pub fn key_prefix(values: impl Into<Vec<Value>>) -> Self {
        SnapshotFilter::KeyPrefix(values.into())
    }

    /// Decide whether an entry (with its key) passes the filter.
    pub fn matches(&self, key: &EntryKey, entry: &Entry) -> bool {
        match self {
            SnapshotFilter::All => true,
            SnapshotFilter::KeyPrefix(prefix) => key.starts_with(prefix),
            SnapshotFilter::Fields(conditions) => conditions
                .iter()
                .all(|(name, expected)| entry.get(name).is_some_and(|v| v == expected)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntrospectionRow;
    use crate::schema::Schema;
    use serde_json::json;
    use std::sync::Arc;

    fn pets_schema() -> Arc<TableSchema> {
        let rows = ["type", "breed", "name"]
            .iter()
            .map(|f| IntrospectionRow {
                table: "pets".to_string(),
                field: f.to_string(),
                main: true,
                type_name: "text".to_string(),
                dims: 0,
                null: false,
                info: None,
                refs: (None, None),
            })
            .chain(std::iter::once(IntrospectionRow {
                table: "pets".to_string(),
                field: "color".to_string(),
                main: false,
                type_name: "int8".to_string(),
                dims: 0,
                null: true,
                info: None,
                refs: (None, None),
            }))
            .collect();
        Schema::from_rows(rows).unwrap().table("pets").unwrap().clone()
    }

    fn munch(schema: &TableSchema) -> Entry {
        let row = json!({"type": "Dog", "breed": "Shiba Inu", "name": "Munch", "color": 16766362});
        Entry::from_row(schema, row.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_from_row_coerces_by_schema() {
        let schema = pets_schema();
        let entry = munch(&schema);
        assert_eq!(entry.get("color"), Some(&Value::Int(16766362)));
        assert_eq!(entry.get("type"), Some(&Value::Text("Dog".to_string())));
    }

    #[test]
    fn test_missing_field_becomes_null() {
        let schema = pets_schema();
        let row = json!({"type": "Cat", "breed": "Persian", "name": "Robert"});
        let entry = Entry::from_row(&schema, row.as_object().unwrap()).unwrap();
        assert!(entry.get("color").unwrap().is_null());
    }

    #[test]
    fn test_key_follows_primary_key_order() {
        let schema = pets_schema();
        let entry = munch(&schema);
        let key = entry.key(&schema).unwrap();
        assert_eq!(
            key,
            EntryKey(vec!["Dog".into(), "Shiba Inu".into(), "Munch".into()])
        );
    }

    #[test]
    fn test_null_key_component_is_rejected() {
        let schema = pets_schema();
        let row = json!({"type": "Dog", "breed": null, "name": "Munch"});
        let entry = Entry::from_row(&schema, row.as_object().unwrap()).unwrap();
        assert!(entry.key(&schema).is_err());
    }

    #[test]
    fn test_key_prefix_matching() {
        let key = EntryKey(vec!["Fish".into(), "Koi".into(), "Aqui".into()]);
        assert!(key.starts_with(&["Fish".into()]));
        assert!(key.starts_with(&["Fish".into(), "Koi".into()]));
        assert!(!key.starts_with(&["Dog".into()]));
        assert!(!key.starts_with(&[
            "Fish".into(),
            "Koi".into(),
            "Aqui".into(),
            "extra".into()
        ]));
    }

    #[test]
    fn test_snapshot_filter_field_eq() {
        let schema = pets_schema();
        let entry = munch(&schema);
        let key = entry.key(&schema).unwrap();
        assert!(SnapshotFilter::field_eq("type", "Dog").matches(&key, &entry));
        assert!(!SnapshotFilter::field_eq("type", "Fish").matches(&key, &entry));
        assert!(SnapshotFilter::All.matches(&key, &entry));
    }
}
