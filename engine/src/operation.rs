//! Write operations against the remote store.
//!
//! Every write the client issues, whether a single optimistic mutation or a
//! reconciliation batch, is expressed as a [`WriteOp`].

use crate::DocPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single write against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WriteOp {
    /// Replace the whole document (creating it if missing).
    Set { path: DocPath, value: Value },
    /// Shallow-merge top-level fields into an existing document.
    Update { path: DocPath, fields: Value },
    /// Remove the document.
    Delete { path: DocPath },
}

impl WriteOp {
    pub fn set(path: DocPath, value: Value) -> Self {
        WriteOp::Set { path, value }
    }

    pub fn update(path: DocPath, fields: Value) -> Self {
        WriteOp::Update { path, fields }
    }

    pub fn delete(path: DocPath) -> Self {
        WriteOp::Delete { path }
    }

    /// Get the document this operation targets.
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. } => path,
            WriteOp::Update { path, .. } => path,
            WriteOp::Delete { path } => path,
        }
    }

    /// Whether the operation removes data.
    pub fn is_destructive(&self) -> bool {
        matches!(self, WriteOp::Delete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors() {
        let op = WriteOp::update(DocPath::order("o-1"), json!({"status": "shipped"}));
        assert_eq!(op.path(), &DocPath::order("o-1"));
        assert!(!op.is_destructive());

        let op = WriteOp::delete(DocPath::order("o-2"));
        assert!(op.is_destructive());
    }

    #[test]
    fn serialization_format() {
        let op = WriteOp::delete(DocPath::order("o-1"));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({"op": "delete", "path": {"collection": "orders", "id": "o-1"}})
        );

        let op = WriteOp::set(DocPath::product("p-1"), json!({"name": "Soap"}));
        let json = serde_json::to_string(&op).unwrap();
        let parsed: WriteOp = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }
}
