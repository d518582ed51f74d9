//! Search error types.

use thiserror::Error;

/// Bad field or record-type registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field '{0}' is already registered")]
    DuplicateField(String),

    #[error("field name '{0}' is reserved")]
    ReservedName(String),

    #[error("field name must not be empty")]
    EmptyName,

    #[error("unknown transform '{expression}' on field '{field}'")]
    UnknownTransform { field: String, expression: String },

    #[error("record type '{0}' is already registered")]
    DuplicateRecordType(String),

    #[error("field '{field}' references unregistered record type '{record_type}'")]
    UnknownRecordType { field: String, record_type: String },
}

/// A query or mapping referenced a field the schema does not declare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown field: {field}")]
pub struct UnknownFieldError {
    pub field: String,
}

impl UnknownFieldError {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// A raw value could not be transformed to its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldMappingError {
    #[error("field '{field}': cannot convert '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("record has no identity")]
    MissingIdentity,

    #[error("record type '{0}' is not registered for indexing")]
    UnknownRecordType(String),

    #[error("record '{id}' is tagged '{tagged}' but was indexed as '{requested}'")]
    RecordTypeMismatch {
        id: String,
        tagged: String,
        requested: String,
    },
}

impl FieldMappingError {
    /// Name of the offending field, when the error concerns one.
    pub fn field(&self) -> Option<&str> {
        match self {
            FieldMappingError::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Malformed or type-mismatched query description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryBuildError {
    #[error(transparent)]
    UnknownField(#[from] UnknownFieldError),

    #[error("field '{field}' holds {expected} values, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("range on '{0}' has bounds of different types")]
    MixedBounds(String),

    #[error("value for '{0}' produced no searchable terms")]
    EmptyTerm(String),
}

/// Errors that can occur during search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    UnknownField(#[from] UnknownFieldError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] FieldMappingError),

    #[error("Query build error: {0}")]
    QueryBuild(#[from] QueryBuildError),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index is locked (poisoned lock)
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    #[error("Index not registered: {0}")]
    UnknownIndex(String),

    #[error("Index already registered: {0}")]
    IndexAlreadyRegistered(String),

    /// The context was closed by registry teardown
    #[error("Searcher context {0} is closed")]
    ContextClosed(u64),

    #[error("Searcher context registry has been shut down")]
    RegistryClosed,
}
