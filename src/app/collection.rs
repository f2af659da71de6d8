use serde_json::{Map, Value};

use super::error::{RenderError, json_kind};

/// One fetched collection, in server order.
///
/// Mappings and relays arrive as JSON objects keyed by a parent identifier,
/// everything else as arrays. Keyed collections count their keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Collection {
    List(Vec<Value>),
    Keyed(Map<String, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entry<'a> {
    Item(&'a Value),
    Keyed(&'a str, &'a Value),
}

impl<'a> Entry<'a> {
    pub fn value(self) -> &'a Value {
        match self {
            Entry::Item(value) | Entry::Keyed(_, value) => value,
        }
    }

    pub fn key(self) -> Option<&'a str> {
        match self {
            Entry::Item(_) => None,
            Entry::Keyed(key, _) => Some(key),
        }
    }
}

impl Default for Collection {
    fn default() -> Self {
        Collection::List(Vec::new())
    }
}

impl Collection {
    /// Accepts either shape; scalars are a shape error.
    pub fn from_value(value: Value) -> Result<Self, RenderError> {
        match value {
            Value::Array(items) => Ok(Collection::List(items)),
            Value::Object(map) => Ok(Collection::Keyed(map)),
            // Spring serializes an absent collection as null.
            Value::Null => Ok(Collection::List(Vec::new())),
            other => Err(RenderError::UnexpectedShape {
                expected: "array or object",
                found: json_kind(&other),
            }),
        }
    }

    pub fn list(value: Value) -> Result<Self, RenderError> {
        match value {
            Value::Array(items) => Ok(Collection::List(items)),
            Value::Null => Ok(Collection::List(Vec::new())),
            other => Err(RenderError::UnexpectedShape {
                expected: "array",
                found: json_kind(&other),
            }),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Collection::List(items) => items.len(),
            Collection::Keyed(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn entries(&self) -> Vec<Entry<'_>> {
        match self {
            Collection::List(items) => items.iter().map(Entry::Item).collect(),
            Collection::Keyed(map) => map
                .iter()
                .map(|(key, value)| Entry::Keyed(key.as_str(), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_collections_count_keys_and_keep_wire_order() {
        let collection = Collection::from_value(json!({
            "zeta": ["a", "b"],
            "alpha": ["c"],
        }))
        .unwrap();
        assert_eq!(collection.count(), 2);
        let keys = collection
            .entries()
            .into_iter()
            .filter_map(Entry::key)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }

    #[test]
    fn scalars_are_rejected() {
        let err = Collection::from_value(json!("nope")).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnexpectedShape {
                expected: "array or object",
                found: "string"
            }
        );
        assert!(Collection::list(json!({"a": 1})).is_err());
    }
}
