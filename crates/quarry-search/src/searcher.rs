//! Query execution against an acquired searcher context.
//!
//! Returns the total match count and ranked record identities; stored
//! field content stays in the engine.

use tantivy::collector::{Count, TopDocs};
use tantivy::schema::Value;
use tantivy::TantivyDocument;
use tracing::debug;

use quarry_types::RecordType;

use crate::context::SearcherHandle;
use crate::criteria::CompiledQuery;
use crate::error::SearchError;
use crate::schema::{NODE_ID_FIELD, RECORD_TYPE_FIELD};

/// Default number of ranked hits.
pub const DEFAULT_LIMIT: usize = 10;

/// Search options for limiting results.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum hits to return
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One ranked match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub node_id: String,
    pub record_type: RecordType,
    pub score: f32,
}

/// Outcome of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Number of matching documents, independent of the limit
    pub total_hits: usize,
    pub hits: Vec<SearchHit>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.total_hits == 0
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.node_id.as_str()).collect()
    }
}

/// Run `query` against the snapshot held by `handle`.
pub fn search(
    handle: &SearcherHandle,
    query: &CompiledQuery,
    options: SearchOptions,
) -> Result<SearchResults, SearchError> {
    let searcher = handle.searcher()?;
    let schema = searcher.schema();
    let node_id_field = schema.get_field(NODE_ID_FIELD)?;
    let record_type_field = schema.get_field(RECORD_TYPE_FIELD)?;

    let limit = options.limit.max(1);
    let (total_hits, top_docs) =
        searcher.search(query.query(), &(Count, TopDocs::with_limit(limit)))?;

    let mut hits = Vec::with_capacity(top_docs.len());
    for (score, address) in top_docs {
        let doc: TantivyDocument = searcher.doc(address)?;
        let node_id = doc
            .get_first(node_id_field)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let record_type = doc
            .get_first(record_type_field)
            .and_then(|v| v.as_str())
            .unwrap_or("");
        hits.push(SearchHit {
            node_id,
            record_type: RecordType::new(record_type),
            score,
        });
    }

    debug!(
        index_id = %handle.context().index_id(),
        total_hits,
        returned = hits.len(),
        "Search complete"
    );

    Ok(SearchResults { total_hits, hits })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::SearcherContextManager;
    use crate::criteria::SearchCriteria;
    use crate::document::DocumentMapper;
    use crate::index::{SearchIndex, SearchIndexConfig};
    use crate::schema::{FieldDefinition, SchemaRegistry};
    use quarry_types::ExternalRecord;

    fn populated() -> (SearchIndex, SearcherContextManager) {
        let mut registry = SchemaRegistry::new();
        registry
            .register_record_type(RecordType::new("Documents"))
            .unwrap();
        registry.register(FieldDefinition::new("Title")).unwrap();
        let schema = Arc::new(registry.freeze().unwrap());
        let index = SearchIndex::open_or_create(SearchIndexConfig::in_memory("docs"), schema)
            .unwrap();

        let mapper = DocumentMapper::new(index.schema().clone());
        let rt = RecordType::new("Documents");
        let mut writer = index.writer().unwrap();
        for (id, title) in [
            ("a", "rust search"),
            ("b", "rust rust rust"),
            ("c", "python"),
        ] {
            let record = ExternalRecord::new(id, "Documents").with_field("Title", title);
            writer.add_document(mapper.map_to_doc(&record, &rt).unwrap()).unwrap();
        }
        writer.commit().unwrap();

        let manager = SearcherContextManager::new();
        manager.register_index(&index).unwrap();
        (index, manager)
    }

    #[test]
    fn test_search_ranks_and_counts() {
        let (index, manager) = populated();
        let handle = manager.acquire("docs").unwrap();
        let query = SearchCriteria::new(index.schema().clone())
            .field("Title", "rust")
            .compile()
            .unwrap();

        let results = search(&handle, &query, SearchOptions::new()).unwrap();
        assert_eq!(results.total_hits, 2);
        assert_eq!(results.hits[0].node_id, "b");
        assert_eq!(results.hits[0].record_type.as_str(), "Documents");
        assert!(results.hits[0].score >= results.hits[1].score);
    }

    #[test]
    fn test_limit_does_not_affect_total() {
        let (index, manager) = populated();
        let handle = manager.acquire("docs").unwrap();
        let query = SearchCriteria::new(index.schema().clone()).compile().unwrap();

        let results = search(&handle, &query, SearchOptions::new().with_limit(1)).unwrap();
        assert_eq!(results.total_hits, 3);
        assert_eq!(results.hits.len(), 1);
    }

    #[test]
    fn test_identity_lookup() {
        let (index, manager) = populated();
        let handle = manager.acquire("docs").unwrap();
        let query = SearchCriteria::new(index.schema().clone())
            .id("c")
            .compile()
            .unwrap();
        let results = search(&handle, &query, SearchOptions::default()).unwrap();
        assert_eq!(results.node_ids(), vec!["c"]);
    }

    #[test]
    fn test_search_after_shutdown_fails() {
        let (index, manager) = populated();
        let handle = manager.acquire("docs").unwrap();
        let query = SearchCriteria::new(index.schema().clone()).compile().unwrap();
        manager.shutdown();
        assert!(matches!(
            search(&handle, &query, SearchOptions::default()),
            Err(SearchError::ContextClosed(_))
        ));
    }
}
