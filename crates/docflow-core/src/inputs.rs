//! Named invocation inputs and outputs.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Input carrying the connection string when it is not configured.
pub const CONNECTION_STRING_INPUT: &str = "Connection String";
/// Input carrying the database name when it is not configured.
pub const DATABASE_NAME_INPUT: &str = "Database Name";
/// Input carrying the collection name when it is not configured.
pub const COLLECTION_NAME_INPUT: &str = "Collection Name";

/// Name-keyed bag of values passed into or out of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputBag {
    values: BTreeMap<String, Bson>,
}

impl InputBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        self.values.insert(name.into(), value.into())
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Bson> {
        self.values.get(name)
    }

    /// Returns true if the bag holds `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Looks up a value that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if the value is absent.
    pub fn require(&self, name: &str) -> Result<&Bson> {
        self.get(name)
            .ok_or_else(|| Error::MissingInput(name.to_string()))
    }

    /// Looks up a non-empty string value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingInput`] if the value is absent, null or empty,
    /// and [`Error::TypeCoercion`] if it is not a string.
    pub fn require_str(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            None | Some(Bson::Null) => Err(Error::MissingInput(name.to_string())),
            Some(Bson::String(s)) if s.is_empty() => Err(Error::MissingInput(name.to_string())),
            Some(Bson::String(s)) => Ok(s),
            Some(other) => Err(Error::coercion(other, "string")),
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates values in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for InputBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl IntoIterator for InputBag {
    type Item = (String, Bson);
    type IntoIter = std::collections::btree_map::IntoIter<String, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str_rejects_blank_values() {
        // Arrange
        let inputs = InputBag::new()
            .with("empty", "")
            .with("null", Bson::Null)
            .with("number", 5);

        // Act & Assert
        assert!(matches!(inputs.require_str("empty"), Err(Error::MissingInput(_))));
        assert!(matches!(inputs.require_str("null"), Err(Error::MissingInput(_))));
        assert!(matches!(inputs.require_str("absent"), Err(Error::MissingInput(_))));
        assert!(matches!(inputs.require_str("number"), Err(Error::TypeCoercion { .. })));
    }

    #[test]
    fn test_require_keeps_null() {
        // Arrange
        let inputs = InputBag::new().with("Name", Bson::Null);

        // Act & Assert
        assert_eq!(inputs.require("Name").expect("present"), &Bson::Null);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        // Arrange
        let inputs: InputBag = [("b", 2), ("a", 1)].into_iter().collect();

        // Act
        let json = serde_json::to_string(&inputs).expect("serialize");

        // Assert
        assert_eq!(json, r#"{"a":1,"b":2}"#);
        assert_eq!(inputs.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
