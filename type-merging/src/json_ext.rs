//! Structured value helpers shared by the planner and the merger.
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

use crate::merge_config::SelectionSet;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

pub(crate) trait ObjectExt {
    /// The names of the fields holding a value. Null fields count as absent.
    fn field_names(&self) -> SelectionSet;

    /// Copies the fields of `selection_set` that are present on this object.
    fn project(&self, selection_set: &SelectionSet) -> Object;

    /// The fields of `selection_set` absent or null on this object.
    fn missing(&self, selection_set: &SelectionSet) -> SelectionSet;
}

impl ObjectExt for Object {
    fn field_names(&self) -> SelectionSet {
        self.iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, _)| key.as_str().to_string())
            .collect()
    }

    fn project(&self, selection_set: &SelectionSet) -> Object {
        selection_set
            .iter()
            .filter_map(|field| {
                self.get(field.as_str())
                    .map(|value| (ByteString::from(field.as_str()), value.clone()))
            })
            .collect()
    }

    fn missing(&self, selection_set: &SelectionSet) -> SelectionSet {
        selection_set
            .iter()
            .filter(|field| self.get(field.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect()
    }
}

/// Renders a value compactly, for error messages and logs.
pub(crate) fn display_value(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}
