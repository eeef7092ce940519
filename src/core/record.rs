//! Stored rows

use crate::core::schema::PRIMARY_KEY;
use crate::core::value::as_id;
use serde::Serialize;
use serde_json::{Map, Value};

/// One row of a model
///
/// `values` holds the column values, including `id`. Relationship values are
/// never stored here; they are resolved through the store when rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub model: String,
    pub id: i64,
    pub values: Map<String, Value>,
}

impl Record {
    pub fn new(model: impl Into<String>, id: i64, mut values: Map<String, Value>) -> Self {
        values.insert(PRIMARY_KEY.to_string(), Value::from(id));
        Self {
            model: model.into(),
            id,
            values,
        }
    }

    /// Column value, `None` when the column was never set
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Value of a foreign-key column as an id
    pub fn foreign_id(&self, column: &str) -> Option<i64> {
        self.values.get(column).and_then(as_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_stores_id() {
        let mut values = Map::new();
        values.insert("name".into(), json!("Ada"));
        values.insert("author_id".into(), json!(3));
        let record = Record::new("User", 5, values);

        assert_eq!(record.get(PRIMARY_KEY), Some(&json!(5)));
        assert_eq!(record.foreign_id("author_id"), Some(3));
        assert_eq!(record.foreign_id("name"), None);
        assert_eq!(record.get("missing"), None);
    }
}
