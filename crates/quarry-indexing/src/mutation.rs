//! Index mutations.

use std::fmt;

use quarry_types::{ExternalRecord, RecordType};

/// One unit of index change. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Clear the index and re-read every registered record type
    RebuildAll,
    /// Replace the document for `record.id`
    Upsert {
        record: ExternalRecord,
        record_type: RecordType,
    },
    /// Look `id` up in the data source and upsert it, or delete it when
    /// the source no longer has it
    Reindex { id: String, record_type: RecordType },
    Delete { id: String },
}

impl Mutation {
    pub fn upsert(record: ExternalRecord, record_type: RecordType) -> Self {
        Mutation::Upsert {
            record,
            record_type,
        }
    }

    pub fn reindex(id: impl Into<String>, record_type: RecordType) -> Self {
        Mutation::Reindex {
            id: id.into(),
            record_type,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Mutation::Delete { id: id.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::RebuildAll => "rebuild",
            Mutation::Upsert { .. } => "upsert",
            Mutation::Reindex { .. } => "reindex",
            Mutation::Delete { .. } => "delete",
        }
    }

    /// Record id this mutation targets, if it targets one.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::RebuildAll => None,
            Mutation::Upsert { record, .. } => Some(&record.id),
            Mutation::Reindex { id, .. } | Mutation::Delete { id } => Some(id),
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::RebuildAll => f.write_str("rebuild"),
            Mutation::Upsert {
                record,
                record_type,
            } => write!(f, "upsert {} ({})", record.id, record_type),
            Mutation::Reindex { id, record_type } => write!(f, "reindex {} ({})", id, record_type),
            Mutation::Delete { id } => write!(f, "delete {}", id),
        }
    }
}
