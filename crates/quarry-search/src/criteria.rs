//! Fluent search criteria compiled to tantivy queries.
//!
//! Clauses are collected as plain descriptions; nothing is checked until
//! [`SearchCriteria::compile`], which resolves every field against the
//! frozen schema and fails with [`QueryBuildError`] on unknown fields or
//! mismatched value types.
//!
//! ```ignore
//! let query = SearchCriteria::new(schema)
//!     .record_type("Pictures")
//!     .date_range("YearCreated", from, to, true, true, DateResolution::Year)
//!     .compile()?;
//! ```

use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use tantivy::query::{AllQuery, BooleanQuery, Occur, PhraseQuery, Query, RangeQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::Term;

use crate::document::to_engine_date;
use crate::error::QueryBuildError;
use crate::schema::{FieldKind, FieldTransform, IndexSchema, RegisteredField};

/// Granularity date bounds are truncated to before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateResolution {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateResolution {
    /// Start of the period containing `value`.
    pub fn truncate(&self, value: &DateTime<Utc>) -> DateTime<Utc> {
        let date = value.date_naive();
        let (month, day) = match self {
            DateResolution::Year => (1, 1),
            DateResolution::Month => (date.month(), 1),
            _ => (date.month(), date.day()),
        };
        let (hour, minute, second) = match self {
            DateResolution::Year | DateResolution::Month | DateResolution::Day => (0, 0, 0),
            DateResolution::Hour => (value.hour(), 0, 0),
            DateResolution::Minute => (value.hour(), value.minute(), 0),
            DateResolution::Second => (value.hour(), value.minute(), value.second()),
        };
        NaiveDate::from_ymd_opt(date.year(), month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .map(|naive| naive.and_utc())
            .unwrap_or(*value)
    }

    /// Start of the period after the one containing `value`.
    pub fn next_period(&self, value: &DateTime<Utc>) -> DateTime<Utc> {
        let start = self.truncate(value);
        let next = match self {
            DateResolution::Year => start.checked_add_months(Months::new(12)),
            DateResolution::Month => start.checked_add_months(Months::new(1)),
            DateResolution::Day => start.checked_add_signed(Duration::days(1)),
            DateResolution::Hour => start.checked_add_signed(Duration::hours(1)),
            DateResolution::Minute => start.checked_add_signed(Duration::minutes(1)),
            DateResolution::Second => start.checked_add_signed(Duration::seconds(1)),
        };
        next.unwrap_or(start)
    }
}

/// How the next clause combines with the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BooleanOperation {
    #[default]
    And,
    Or,
    Not,
}

impl BooleanOperation {
    fn occur(self) -> Occur {
        match self {
            BooleanOperation::And => Occur::Must,
            BooleanOperation::Or => Occur::Should,
            BooleanOperation::Not => Occur::MustNot,
        }
    }
}

/// A typed query value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Text(String),
    I64(i64),
    F64(f64),
    Date(DateTime<Utc>),
}

impl QueryValue {
    fn kind_name(&self) -> &'static str {
        match self {
            QueryValue::Text(_) => FieldKind::Text.as_str(),
            QueryValue::I64(_) => FieldKind::I64.as_str(),
            QueryValue::F64(_) => FieldKind::F64.as_str(),
            QueryValue::Date(_) => FieldKind::Date.as_str(),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Text(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Text(v)
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::I64(v as i64)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::I64(v)
    }
}

impl From<f32> for QueryValue {
    fn from(v: f32) -> Self {
        QueryValue::F64(v as f64)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::F64(v)
    }
}

impl From<DateTime<Utc>> for QueryValue {
    fn from(v: DateTime<Utc>) -> Self {
        QueryValue::Date(v)
    }
}

#[derive(Debug, Clone)]
enum Clause {
    Field {
        name: String,
        value: QueryValue,
    },
    NodeId(String),
    RecordType(String),
    Range {
        name: String,
        lower: QueryValue,
        upper: QueryValue,
        include_lower: bool,
        include_upper: bool,
    },
    DateRange {
        name: String,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        include_lower: bool,
        include_upper: bool,
        resolution: DateResolution,
    },
}

/// An engine-native query ready for execution.
#[derive(Debug)]
pub struct CompiledQuery {
    query: Box<dyn Query>,
}

impl Clone for CompiledQuery {
    fn clone(&self) -> Self {
        Self {
            query: self.query.box_clone(),
        }
    }
}

impl CompiledQuery {
    pub fn query(&self) -> &dyn Query {
        self.query.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn Query> {
        self.query
    }
}

/// Fluent query description over a frozen schema.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    schema: Arc<IndexSchema>,
    next: BooleanOperation,
    clauses: Vec<(BooleanOperation, Clause)>,
}

impl SearchCriteria {
    pub fn new(schema: Arc<IndexSchema>) -> Self {
        Self {
            schema,
            next: BooleanOperation::default(),
            clauses: Vec::new(),
        }
    }

    /// The next clause is required.
    pub fn and(mut self) -> Self {
        self.next = BooleanOperation::And;
        self
    }

    /// The next clause is optional.
    pub fn or(mut self) -> Self {
        self.next = BooleanOperation::Or;
        self
    }

    /// The next clause must not match.
    pub fn not(mut self) -> Self {
        self.next = BooleanOperation::Not;
        self
    }

    /// Equality on a declared field.
    pub fn field(self, name: &str, value: impl Into<QueryValue>) -> Self {
        self.push(Clause::Field {
            name: name.to_string(),
            value: value.into(),
        })
    }

    /// Match a record by identity.
    pub fn id(self, node_id: &str) -> Self {
        self.push(Clause::NodeId(node_id.to_string()))
    }

    pub fn record_type(self, record_type: &str) -> Self {
        self.push(Clause::RecordType(record_type.to_string()))
    }

    /// Range over raw values of a declared field.
    pub fn range(
        self,
        name: &str,
        lower: impl Into<QueryValue>,
        upper: impl Into<QueryValue>,
        include_lower: bool,
        include_upper: bool,
    ) -> Self {
        self.push(Clause::Range {
            name: name.to_string(),
            lower: lower.into(),
            upper: upper.into(),
            include_lower,
            include_upper,
        })
    }

    /// Date range with both bounds truncated to `resolution`.
    ///
    /// Works on `DateTime` fields and on `Date.*` component fields; the
    /// latter compare the matching component of the truncated bounds.
    pub fn date_range(
        self,
        name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        include_lower: bool,
        include_upper: bool,
        resolution: DateResolution,
    ) -> Self {
        self.push(Clause::DateRange {
            name: name.to_string(),
            from,
            to,
            include_lower,
            include_upper,
            resolution,
        })
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn push(mut self, clause: Clause) -> Self {
        let op = std::mem::take(&mut self.next);
        self.clauses.push((op, clause));
        self
    }

    /// Translate into a tantivy query. Pure; performs no I/O.
    pub fn compile(&self) -> Result<CompiledQuery, QueryBuildError> {
        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(self.clauses.len());
        for (op, clause) in &self.clauses {
            subqueries.push((op.occur(), self.compile_clause(clause)?));
        }

        if subqueries.is_empty() {
            return Ok(CompiledQuery {
                query: Box::new(AllQuery),
            });
        }
        if subqueries.iter().all(|(occur, _)| *occur == Occur::MustNot) {
            subqueries.insert(0, (Occur::Must, Box::new(AllQuery)));
        }
        let query: Box<dyn Query> = if subqueries.len() == 1 && subqueries[0].0 != Occur::MustNot {
            subqueries.remove(0).1
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };
        Ok(CompiledQuery { query })
    }

    fn compile_clause(&self, clause: &Clause) -> Result<Box<dyn Query>, QueryBuildError> {
        match clause {
            Clause::NodeId(id) => Ok(raw_term_query(self.schema.node_id_field(), id)),
            Clause::RecordType(rt) => Ok(raw_term_query(self.schema.record_type_field(), rt)),
            Clause::Field { name, value } => {
                let (field, declared) = self.schema.lookup(name)?;
                if declared.kind() == FieldKind::Text {
                    let QueryValue::Text(text) = value else {
                        return Err(mismatch(declared, value));
                    };
                    return analyzed_text_query(field, name, text);
                }
                let term = value_term(field, declared, value)?;
                Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            Clause::Range {
                name,
                lower,
                upper,
                include_lower,
                include_upper,
            } => {
                let (field, declared) = self.schema.lookup(name)?;
                let (lower, upper) = match (
                    value_term(field, declared, lower),
                    value_term(field, declared, upper),
                ) {
                    (Ok(lower), Ok(upper)) => (lower, upper),
                    // One bound fits the field and the other does not
                    (Ok(_), Err(_)) | (Err(_), Ok(_))
                        if std::mem::discriminant(lower) != std::mem::discriminant(upper) =>
                    {
                        return Err(QueryBuildError::MixedBounds(name.clone()));
                    }
                    (Err(e), _) | (_, Err(e)) => return Err(e),
                };
                Ok(Box::new(RangeQuery::new(
                    bound(lower, *include_lower),
                    bound(upper, *include_upper),
                )))
            }
            Clause::DateRange {
                name,
                from,
                to,
                include_lower,
                include_upper,
                resolution,
            } => {
                let (field, declared) = self.schema.lookup(name)?;
                match declared.transform() {
                    FieldTransform::DatePart(component) => {
                        let lower = component.extract(&resolution.truncate(from));
                        let upper = component.extract(&resolution.truncate(to));
                        Ok(Box::new(RangeQuery::new(
                            bound(Term::from_field_i64(field, lower), *include_lower),
                            bound(Term::from_field_i64(field, upper), *include_upper),
                        )))
                    }
                    FieldTransform::DateTime => {
                        let lower = if *include_lower {
                            resolution.truncate(from)
                        } else {
                            resolution.next_period(from)
                        };
                        let upper = if *include_upper {
                            resolution.next_period(to)
                        } else {
                            resolution.truncate(to)
                        };
                        Ok(Box::new(RangeQuery::new(
                            Bound::Included(Term::from_field_date(field, to_engine_date(&lower))),
                            Bound::Excluded(Term::from_field_date(field, to_engine_date(&upper))),
                        )))
                    }
                    _ => Err(QueryBuildError::TypeMismatch {
                        field: name.clone(),
                        expected: declared.kind().as_str(),
                        found: FieldKind::Date.as_str(),
                    }),
                }
            }
        }
    }
}

fn bound(term: Term, inclusive: bool) -> Bound<Term> {
    if inclusive {
        Bound::Included(term)
    } else {
        Bound::Excluded(term)
    }
}

fn mismatch(declared: &RegisteredField, value: &QueryValue) -> QueryBuildError {
    QueryBuildError::TypeMismatch {
        field: declared.name().to_string(),
        expected: declared.kind().as_str(),
        found: value.kind_name(),
    }
}

fn raw_term_query(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}

/// Term for a non-analyzed comparison. Integers widen to floats.
fn value_term(
    field: Field,
    declared: &RegisteredField,
    value: &QueryValue,
) -> Result<Term, QueryBuildError> {
    let term = match (declared.kind(), value) {
        (FieldKind::Text, QueryValue::Text(v)) => Term::from_field_text(field, v),
        (FieldKind::I64, QueryValue::I64(v)) => Term::from_field_i64(field, *v),
        (FieldKind::F64, QueryValue::F64(v)) => Term::from_field_f64(field, *v),
        (FieldKind::F64, QueryValue::I64(v)) => Term::from_field_f64(field, *v as f64),
        (FieldKind::Date, QueryValue::Date(v)) => Term::from_field_date(field, to_engine_date(v)),
        _ => return Err(mismatch(declared, value)),
    };
    Ok(term)
}

/// Run `text` through the analyzer text fields are indexed with.
fn analyzed_text_query(
    field: Field,
    name: &str,
    text: &str,
) -> Result<Box<dyn Query>, QueryBuildError> {
    let mut analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build();
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while let Some(token) = stream.next() {
        terms.push(Term::from_field_text(field, &token.text));
    }

    match terms.len() {
        0 => Err(QueryBuildError::EmptyTerm(name.to_string())),
        1 => Ok(Box::new(TermQuery::new(
            terms.remove(0),
            IndexRecordOption::WithFreqs,
        ))),
        _ => Ok(Box::new(PhraseQuery::new(terms))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMapper;
    use crate::schema::{FieldDefinition, SchemaRegistry};
    use chrono::TimeZone;
    use quarry_types::{ExternalRecord, RecordType};
    use tantivy::collector::Count;
    use tantivy::Index;

    fn schema() -> Arc<IndexSchema> {
        let mut registry = SchemaRegistry::new();
        registry
            .register_record_type(RecordType::new("Documents"))
            .unwrap();
        registry
            .register_record_type(RecordType::new("Pictures"))
            .unwrap();
        for def in [
            FieldDefinition::new("Title"),
            FieldDefinition::new("DateCreated").with_type("DateTime"),
            FieldDefinition::new("YearCreated")
                .with_type("Date.Year")
                .with_source("DateCreated"),
            FieldDefinition::new("SomeNumber").with_type("Number"),
            FieldDefinition::new("SomeDouble").with_type("Double"),
        ] {
            registry.register(def).unwrap();
        }
        Arc::new(registry.freeze().unwrap())
    }

    fn record(id: &str, rt: &str, title: &str, date: &str, number: i32) -> ExternalRecord {
        ExternalRecord::new(id, rt)
            .with_field("Title", title)
            .with_field("DateCreated", date)
            .with_field("SomeNumber", number.to_string())
            .with_field("SomeDouble", format!("{}.5", number))
    }

    fn index_with_records(schema: &Arc<IndexSchema>) -> Index {
        let index = Index::create_in_ram(schema.schema().clone());
        let mapper = DocumentMapper::new(schema.clone());
        let mut writer = index.writer(15_000_000).unwrap();
        for r in [
            record("1", "Documents", "Quarterly Report", "2020-03-15T10:00:00Z", 10),
            record("2", "Documents", "Annual report draft", "2021-06-01T00:00:00Z", 20),
            record("3", "Pictures", "Harbour at dusk", "2021-12-31T23:59:00Z", 30),
            record("4", "Pictures", "Harbour at dawn", "2022-01-01T00:00:00Z", 40),
        ] {
            let rt = RecordType::new(r.record_type.as_str());
            writer.add_document(mapper.map_to_doc(&r, &rt).unwrap()).unwrap();
        }
        writer.commit().unwrap();
        index
    }

    fn count(index: &Index, criteria: SearchCriteria) -> usize {
        let query = criteria.compile().unwrap();
        let searcher = index.reader().unwrap().searcher();
        searcher.search(query.query(), &Count).unwrap()
    }

    #[test]
    fn test_truncate() {
        let dt = Utc.with_ymd_and_hms(2021, 7, 4, 13, 45, 30).unwrap();
        assert_eq!(
            DateResolution::Year.truncate(&dt),
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateResolution::Month.truncate(&dt),
            Utc.with_ymd_and_hms(2021, 7, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateResolution::Hour.truncate(&dt),
            Utc.with_ymd_and_hms(2021, 7, 4, 13, 0, 0).unwrap()
        );
        assert_eq!(DateResolution::Second.truncate(&dt), dt);
    }

    #[test]
    fn test_next_period() {
        let dt = Utc.with_ymd_and_hms(2021, 12, 31, 22, 10, 0).unwrap();
        assert_eq!(
            DateResolution::Year.next_period(&dt),
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateResolution::Month.next_period(&dt),
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateResolution::Day.next_period(&dt),
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            DateResolution::Minute.next_period(&dt),
            Utc.with_ymd_and_hms(2021, 12, 31, 22, 11, 0).unwrap()
        );
    }

    #[test]
    fn test_empty_criteria_matches_all() {
        let schema = schema();
        let index = index_with_records(&schema);
        assert_eq!(count(&index, SearchCriteria::new(schema)), 4);
    }

    #[test]
    fn test_text_equality_is_analyzed() {
        let schema = schema();
        let index = index_with_records(&schema);
        assert_eq!(
            count(&index, SearchCriteria::new(schema.clone()).field("Title", "REPORT")),
            2
        );
        assert_eq!(
            count(&index, SearchCriteria::new(schema).field("Title", "harbour at dusk")),
            1
        );
    }

    #[test]
    fn test_id_and_record_type() {
        let schema = schema();
        let index = index_with_records(&schema);
        assert_eq!(count(&index, SearchCriteria::new(schema.clone()).id("3")), 1);
        assert_eq!(
            count(&index, SearchCriteria::new(schema).record_type("Pictures")),
            2
        );
    }

    #[test]
    fn test_boolean_modifiers() {
        let schema = schema();
        let index = index_with_records(&schema);
        let criteria = SearchCriteria::new(schema.clone())
            .record_type("Pictures")
            .not()
            .field("Title", "dawn");
        assert_eq!(count(&index, criteria), 1);

        let only_negative = SearchCriteria::new(schema.clone())
            .not()
            .record_type("Pictures");
        assert_eq!(count(&index, only_negative), 2);

        let either = SearchCriteria::new(schema)
            .or()
            .id("1")
            .or()
            .id("4");
        assert_eq!(count(&index, either), 2);
    }

    #[test]
    fn test_numeric_range_inclusive_flags() {
        let schema = schema();
        let index = index_with_records(&schema);
        let inclusive = SearchCriteria::new(schema.clone()).range("SomeNumber", 20, 40, true, true);
        assert_eq!(count(&index, inclusive), 3);
        let exclusive =
            SearchCriteria::new(schema.clone()).range("SomeNumber", 20, 40, false, false);
        assert_eq!(count(&index, exclusive), 1);
        let widened = SearchCriteria::new(schema.clone()).range("SomeDouble", 10, 21, true, true);
        assert_eq!(count(&index, widened), 2);
        let integer_and_float =
            SearchCriteria::new(schema).range("SomeDouble", 10, 21.5, true, false);
        assert_eq!(count(&index, integer_and_float), 2);
    }

    #[test]
    fn test_compiled_query_clones() {
        let schema = schema();
        let index = index_with_records(&schema);
        let compiled = SearchCriteria::new(schema)
            .record_type("Pictures")
            .compile()
            .unwrap();
        let copy = compiled.clone();
        let searcher = index.reader().unwrap().searcher();
        assert_eq!(searcher.search(compiled.query(), &Count).unwrap(), 2);
        assert_eq!(searcher.search(copy.into_inner().as_ref(), &Count).unwrap(), 2);
    }

    #[test]
    fn test_year_component_range() {
        let schema = schema();
        let index = index_with_records(&schema);
        let from = Utc.with_ymd_and_hms(2020, 11, 20, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap();
        let criteria = SearchCriteria::new(schema).date_range(
            "YearCreated",
            from,
            to,
            true,
            true,
            DateResolution::Year,
        );
        // 2020 and 2021, regardless of month
        assert_eq!(count(&index, criteria), 3);
    }

    #[test]
    fn test_datetime_range_at_day_resolution() {
        let schema = schema();
        let index = index_with_records(&schema);
        let from = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2021, 12, 31, 0, 0, 0).unwrap();

        let inclusive = SearchCriteria::new(schema.clone()).date_range(
            "DateCreated",
            from,
            to,
            true,
            true,
            DateResolution::Day,
        );
        assert_eq!(count(&index, inclusive), 2);

        let exclusive_upper = SearchCriteria::new(schema).date_range(
            "DateCreated",
            from,
            to,
            true,
            false,
            DateResolution::Day,
        );
        assert_eq!(count(&index, exclusive_upper), 1);
    }

    #[test]
    fn test_unknown_field() {
        let err = SearchCriteria::new(schema())
            .field("Nope", "x")
            .compile()
            .unwrap_err();
        assert!(matches!(err, QueryBuildError::UnknownField(_)));
    }

    #[test]
    fn test_type_mismatch() {
        let err = SearchCriteria::new(schema())
            .field("SomeNumber", "ten")
            .compile()
            .unwrap_err();
        assert_eq!(
            err,
            QueryBuildError::TypeMismatch {
                field: "SomeNumber".into(),
                expected: "integer",
                found: "text",
            }
        );

        let err = SearchCriteria::new(schema())
            .date_range(
                "SomeNumber",
                Utc::now(),
                Utc::now(),
                true,
                true,
                DateResolution::Day,
            )
            .compile()
            .unwrap_err();
        assert!(matches!(err, QueryBuildError::TypeMismatch { .. }));
    }

    #[test]
    fn test_mixed_bounds() {
        let err = SearchCriteria::new(schema())
            .range("SomeNumber", 1, 2.5, true, true)
            .compile()
            .unwrap_err();
        assert_eq!(err, QueryBuildError::MixedBounds("SomeNumber".into()));
    }

    #[test]
    fn test_empty_text_term() {
        let err = SearchCriteria::new(schema())
            .field("Title", "  ")
            .compile()
            .unwrap_err();
        assert_eq!(err, QueryBuildError::EmptyTerm("Title".into()));
    }
}
