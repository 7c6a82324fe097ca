use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::change_action::ChangeAction;

/// One change notification as received from the event stream.
///
/// `rows` carries the server-reported state: new rows for creates, current
/// rows for updates, removed rows for deletes. `old_rows`, when the server
/// sends it, carries the pre-update images paired index-wise with `rows`.
/// `revision` is the optional per-table monotone counter used for gap
/// detection; servers that do not track revisions omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// What happened
    pub action: ChangeAction,

    /// Affected table
    pub table: String,

    /// Affected rows, in server-emitted order
    pub rows: Vec<JsonMap<String, JsonValue>>,

    /// Pre-update row images (updates only, optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_rows: Option<Vec<JsonMap<String, JsonValue>>>,

    /// Per-table monotone revision counter, when the server exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_minimal_create() {
        let raw = json!({
            "action": "create",
            "table": "pets",
            "rows": [{"type": "Fish", "breed": "Koi", "name": "Aqui"}]
        });
        let msg: EventMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.action, ChangeAction::Create);
        assert_eq!(msg.table, "pets");
        assert_eq!(msg.rows.len(), 1);
        assert!(msg.old_rows.is_none());
        assert!(msg.revision.is_none());
    }

    #[test]
    fn test_decode_update_with_revision() {
        let raw = json!({
            "action": "update",
            "table": "pets",
            "rows": [{"name": "Munch", "groomed": true}],
            "old_rows": [{"name": "Munch", "groomed": false}],
            "revision": 17
        });
        let msg: EventMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.action, ChangeAction::Update);
        assert_eq!(msg.revision, Some(17));
        assert_eq!(msg.old_rows.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_decode_rejects_unknown_action() {
        let raw = json!({"action": "truncate", "table": "pets", "rows": []});
        assert!(serde_json::from_value::<EventMessage>(raw).is_err());
    }
}
