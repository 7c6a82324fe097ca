//! Schema model: a typed description of the remote tables.
//!
//! Built exactly once per session from the introspection result and never
//! mutated afterwards, so it is shared as `Arc<Schema>` and read freely from
//! any task. Tables absent from the schema cannot be cached or mutated.

use crate::error::{Result, SyncError};
use crate::models::IntrospectionRow;
use crate::value::PgType;
use std::collections::HashMap;
use std::sync::Arc;

/// A reference from one field to another table's field (foreign key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Referenced table name
    pub table: String,
    /// Referenced field name
    pub field: String,
}

/// One column of a remote table. Immutable once built.
#[derive(Debug, Clone)]
pub struct Field {
    /// Column name
    pub name: String,
    /// Remote type name as introspected
    pub type_name: String,
    /// Parsed remote type driving value coercion
    pub pg_type: PgType,
    /// Array-nesting depth (0 for scalars)
    pub dims: u8,
    /// Whether the column is nullable
    pub nullable: bool,
    /// Whether the column is part of the primary key
    pub primary: bool,
    /// Foreign-key reference, when the introspection reported one
    pub reference: Option<FieldRef>,
    /// Attached column comment
    pub description: Option<String>,
}

/// Typed description of one remote table.
///
/// Field order is the introspection's display order; composite primary keys
/// keep the order in which their member fields appear.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Ordered columns as returned by introspection
    pub fields: Vec<Field>,
    /// Primary-key field names, in field order
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of primary-key components.
    pub fn key_len(&self) -> usize {
        self.primary_key.len()
    }
}

/// Immutable mapping from table name to [`TableSchema`].
#[derive(Debug, Clone)]
pub struct Schema {
    tables: HashMap<String, Arc<TableSchema>>,
    /// Table names in first-seen introspection order.
    order: Vec<String>,
}

impl Schema {
    /// Build the schema from introspection rows.
    ///
    /// Rows are grouped by table, preserving per-table field order as
    /// returned. Fails when the result is empty (misconfigured remote schema
    /// or insufficient privilege) or when any table has no primary-key
    /// fields — the cache cannot key its rows.
    pub fn from_rows(rows: Vec<IntrospectionRow>) -> Result<Self> {
        if rows.is_empty() {
            return Err(SyncError::Schema(
                "introspection returned no rows; remote schema is empty or unreadable".to_string(),
            ));
        }

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<Field>> = HashMap::new();

        for row in rows {
            let reference = match row.refs {
                (Some(table), Some(field)) => Some(FieldRef { table, field }),
                _ => None,
            };
            let field = Field {
                pg_type: PgType::parse(&row.type_name),
                name: row.field,
                type_name: row.type_name,
                dims: row.dims,
                nullable: row.null,
                primary: row.main,
                reference,
                description: row.info,
            };
            if !grouped.contains_key(&row.table) {
                order.push(row.table.clone());
            }
            grouped.entry(row.table).or_default().push(field);
        }

        let mut tables = HashMap::with_capacity(order.len());
        for name in &order {
            let fields = grouped.remove(name).unwrap_or_default();
            let primary_key: Vec<String> =
                fields.iter().filter(|f| f.primary).map(|f| f.name.clone()).collect();
            if primary_key.is_empty() {
                return Err(SyncError::Schema(format!(
                    "table '{}' has no primary-key fields; its rows cannot be cached",
                    name
                )));
            }
            tables.insert(
                name.clone(),
                Arc::new(TableSchema {
                    name: name.clone(),
                    fields,
                    primary_key,
                }),
            );
        }

        Ok(Self { tables, order })
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    /// Table names in introspection order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True when the schema describes no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
