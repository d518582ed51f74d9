//! External records and record types.
//!
//! An [`ExternalRecord`] is what a data source hands to the indexing core:
//! a stable identity, a type tag and an ordered list of raw name/value
//! pairs. The core never mutates records.

use serde::{Deserialize, Serialize};

use crate::error::QuarryError;

/// A named partition of the record space (e.g. "Documents", "Pictures").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordType {
    name: String,
}

impl RecordType {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for RecordType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One raw name/value pair of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub value: String,
}

/// A record supplied by an external data source.
///
/// Field order is preserved as supplied. When a name appears more than
/// once, lookups return the first value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    /// Unique identifier, stable for the lifetime of the record
    pub id: String,

    /// Type tag assigned by the data source
    #[serde(default)]
    pub record_type: String,

    /// Raw field values in source order
    #[serde(default)]
    pub fields: Vec<RecordField>,
}

impl ExternalRecord {
    /// Create a record with no fields.
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            fields: Vec::new(),
        }
    }

    /// Append a raw field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(RecordField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First raw value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Iterate raw (name, value) pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str()))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Parse a record from its JSON transfer format.
    pub fn from_json(json: &str) -> Result<Self, QuarryError> {
        let record: ExternalRecord = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize to the JSON transfer format.
    pub fn to_json(&self) -> Result<String, QuarryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check that the record carries an identity.
    pub fn validate(&self) -> Result<(), QuarryError> {
        if self.id.trim().is_empty() {
            return Err(QuarryError::InvalidInput(
                "record id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
