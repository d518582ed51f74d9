//! # quarry-search
//!
//! Field schema, document mapping and read-side coordination over Tantivy.
//!
//! ## Components
//! - [`SchemaRegistry`] / [`IndexSchema`]: declared fields, transforms and
//!   record types, frozen into the engine schema before indexing
//! - [`DocumentMapper`]: pure mapping from [`quarry_types::ExternalRecord`]
//!   to engine documents
//! - [`SearchIndex`]: on-disk or in-memory index with writer/reader access
//! - [`SearcherContextManager`]: reference-counted point-in-time snapshots
//! - [`SearchCriteria`]: fluent queries compiled against the schema
//! - [`search`]: executes a compiled query on an acquired snapshot

pub mod context;
pub mod criteria;
pub mod document;
pub mod error;
pub mod index;
pub mod schema;
pub mod searcher;

pub use context::{SearcherContext, SearcherContextManager, SearcherHandle};
pub use criteria::{BooleanOperation, CompiledQuery, DateResolution, QueryValue, SearchCriteria};
pub use document::{parse_date, DocumentMapper, FieldValue, IndexedDocument, IndexedField};
pub use error::{FieldMappingError, QueryBuildError, SchemaError, SearchError, UnknownFieldError};
pub use index::{open_or_create_index, IndexLocation, SearchIndex, SearchIndexConfig};
pub use schema::{
    DateComponent, FieldDefinition, FieldKind, FieldTransform, IndexSchema, RegisteredField,
    SchemaRegistry, StorageFlags, NODE_ID_FIELD, RECORD_TYPE_FIELD,
};
pub use searcher::{search, SearchHit, SearchOptions, SearchResults};
