//! # quarry-types
//!
//! Shared domain types for the quarry indexing middleware.
//!
//! This crate defines the data structures exchanged between the external
//! content source and the indexing core:
//! - Records: identity, type tag and ordered raw field values
//! - Record types: named partitions of the record space
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use quarry_types::{ExternalRecord, RecordType};
//!
//! let record = ExternalRecord::new("1001", "Documents")
//!     .with_field("Title", "Quarterly report")
//!     .with_field("DateCreated", "2024-03-01T10:15:00Z");
//! let documents = RecordType::new("Documents");
//! assert_eq!(record.record_type, documents.as_str());
//! ```

pub mod config;
pub mod error;
pub mod record;

pub use config::{FieldSettings, QueueSettings, SearchSettings, Settings};
pub use error::QuarryError;
pub use record::{ExternalRecord, RecordField, RecordType};
