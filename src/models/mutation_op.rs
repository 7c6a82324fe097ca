use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::change_action::ChangeAction;

/// One operation inside a mutation batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MutationOp {
    /// Insert one row with the given column values.
    Create {
        /// Column values for the new row
        values: JsonMap<String, JsonValue>,
    },

    /// Update every row matching `filter` with `values`.
    Update {
        /// Equality conditions selecting the rows to change
        filter: JsonMap<String, JsonValue>,
        /// Column values to apply
        values: JsonMap<String, JsonValue>,
    },

    /// Delete every row matching `filter`.
    Delete {
        /// Equality conditions selecting the rows to remove
        filter: JsonMap<String, JsonValue>,
    },
}

impl MutationOp {
    /// The action kind of this operation.
    pub fn action(&self) -> ChangeAction {
        match self {
            MutationOp::Create { .. } => ChangeAction::Create,
            MutationOp::Update { .. } => ChangeAction::Update,
            MutationOp::Delete { .. } => ChangeAction::Delete,
        }
    }
}

/// A full batch request: all operations submitted as one request, applied
/// all-or-nothing by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Operations in submission order
    pub ops: Vec<MutationOp>,
}

/// Successful batch response: the rows the server reports as written, one
/// array per operation, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse {
    /// Written rows per operation, preserving request order
    pub results: Vec<Vec<JsonMap<String, JsonValue>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_op_serialization_shape() {
        let op = MutationOp::Create {
            values: json!({"name": "Aqui"}).as_object().unwrap().clone(),
        };
        let raw = serde_json::to_value(&op).unwrap();
        assert_eq!(raw, json!({"action": "create", "values": {"name": "Aqui"}}));
    }

    #[test]
    fn test_batch_round_trip() {
        let request = MutationRequest {
            ops: vec![
                MutationOp::Create {
                    values: json!({"name": "Aqui"}).as_object().unwrap().clone(),
                },
                MutationOp::Delete {
                    filter: json!({"type": "Fish"}).as_object().unwrap().clone(),
                },
            ],
        };
        let raw = serde_json::to_string(&request).unwrap();
        let decoded: MutationRequest = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.ops.len(), 2);
        assert_eq!(decoded.ops[1].action(), ChangeAction::Delete);
    }
}
