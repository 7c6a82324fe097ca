use serde::{Deserialize, Serialize};

/// One row of the remote introspection result.
///
/// The introspection endpoint describes every exposed column as a flat row;
/// the schema builder groups these by table. Field names follow the remote
/// schema-description contract (`main` is the primary-key flag, `dims` the
/// array-nesting depth, `refs` the referenced table and field or null for
/// both).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionRow {
    /// Owning table name
    pub table: String,

    /// Field name
    pub field: String,

    /// Whether this field is part of the table's primary key
    pub main: bool,

    /// Remote type name (e.g. `int8`, `text`, `timestamptz`)
    #[serde(rename = "type")]
    pub type_name: String,

    /// Number of array dimensions (0 for scalar columns)
    #[serde(default)]
    pub dims: u8,

    /// Whether the column is nullable
    #[serde(default)]
    pub null: bool,

    /// Attached column comment, if any
    #[serde(default)]
    pub info: Option<String>,

    /// Referenced `[table, field]`; both elements null when the column
    /// references nothing
    #[serde(default)]
    pub refs: (Option<String>, Option<String>),
}
