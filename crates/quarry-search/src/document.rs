//! Document mapping from external records to Tantivy documents.
//!
//! Mapping is pure: the same record and record type always produce the
//! same [`IndexedDocument`], and nothing touches the engine until the
//! writer adds the converted document.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tantivy::schema::Field;
use tantivy::TantivyDocument;

use quarry_types::{ExternalRecord, RecordType};

use crate::error::FieldMappingError;
use crate::schema::{FieldTransform, IndexSchema, StorageFlags};

/// A typed value ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    I64(i64),
    F64(f64),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// One mapped field of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedField {
    pub name: String,
    pub field: Field,
    pub value: FieldValue,
    pub flags: StorageFlags,
}

/// Engine-ready representation of one external record.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    /// Value of the reserved node-identity field
    pub node_id: String,
    /// Value of the reserved record-type field
    pub record_type: RecordType,
    /// Declared fields that had a source value
    pub fields: Vec<IndexedField>,
}

impl IndexedDocument {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Convert to a Tantivy document, system fields first.
    pub fn to_tantivy(&self, schema: &IndexSchema) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(schema.node_id_field(), &self.node_id);
        doc.add_text(schema.record_type_field(), self.record_type.as_str());

        for field in &self.fields {
            match &field.value {
                FieldValue::Text(v) => doc.add_text(field.field, v),
                FieldValue::I64(v) => doc.add_i64(field.field, *v),
                FieldValue::F64(v) => doc.add_f64(field.field, *v),
                FieldValue::Date(v) => doc.add_date(field.field, to_engine_date(v)),
            }
        }
        doc
    }
}

/// Convert a chrono timestamp to the engine's date type.
pub fn to_engine_date(value: &DateTime<Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_micros(value.timestamp_micros())
}

/// Parse a raw date/time value.
///
/// Accepts RFC 3339 and naive `YYYY-MM-DD[(T| )HH:MM:SS[.fff]]` forms;
/// naive values are taken as UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Maps external records onto the frozen schema.
#[derive(Debug, Clone)]
pub struct DocumentMapper {
    schema: Arc<IndexSchema>,
}

impl DocumentMapper {
    pub fn new(schema: Arc<IndexSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    /// Map one record under `record_type`.
    ///
    /// Every declared field applying to the record type is evaluated
    /// against its source value; fields without a source value are left
    /// out. The two system fields are always set.
    pub fn map(
        &self,
        record: &ExternalRecord,
        record_type: &RecordType,
    ) -> Result<IndexedDocument, FieldMappingError> {
        if record.id.trim().is_empty() {
            return Err(FieldMappingError::MissingIdentity);
        }
        if !self.schema.has_record_type(record_type) {
            return Err(FieldMappingError::UnknownRecordType(
                record_type.to_string(),
            ));
        }
        if !record.record_type.is_empty() && record.record_type != record_type.as_str() {
            return Err(FieldMappingError::RecordTypeMismatch {
                id: record.id.clone(),
                tagged: record.record_type.clone(),
                requested: record_type.to_string(),
            });
        }

        let mut fields = Vec::new();
        for (handle, declared) in self.schema.fields_for(record_type) {
            let Some(raw) = record.get(declared.source()) else {
                continue;
            };
            let value = transform_value(declared.name(), declared.transform(), raw)?;
            fields.push(IndexedField {
                name: declared.name().to_string(),
                field: handle,
                value,
                flags: declared.flags(),
            });
        }

        Ok(IndexedDocument {
            node_id: record.id.clone(),
            record_type: record_type.clone(),
            fields,
        })
    }

    /// Map straight to a Tantivy document.
    pub fn map_to_doc(
        &self,
        record: &ExternalRecord,
        record_type: &RecordType,
    ) -> Result<TantivyDocument, FieldMappingError> {
        Ok(self.map(record, record_type)?.to_tantivy(&self.schema))
    }
}

fn transform_value(
    field: &str,
    transform: FieldTransform,
    raw: &str,
) -> Result<FieldValue, FieldMappingError> {
    let invalid = |reason: String| FieldMappingError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason,
    };
    let trimmed = raw.trim();

    let value = match transform {
        FieldTransform::Text => FieldValue::Text(raw.to_string()),
        FieldTransform::DateTime => FieldValue::Date(
            parse_date(trimmed).ok_or_else(|| invalid("not a date".to_string()))?,
        ),
        FieldTransform::DatePart(component) => {
            let date = parse_date(trimmed).ok_or_else(|| invalid("not a date".to_string()))?;
            FieldValue::I64(component.extract(&date))
        }
        FieldTransform::Number => FieldValue::I64(
            trimmed
                .parse::<i32>()
                .map_err(|e| invalid(e.to_string()))? as i64,
        ),
        FieldTransform::Long => {
            FieldValue::I64(trimmed.parse::<i64>().map_err(|e| invalid(e.to_string()))?)
        }
        FieldTransform::Float => FieldValue::F64(
            trimmed
                .parse::<f32>()
                .map_err(|e| invalid(e.to_string()))? as f64,
        ),
        FieldTransform::Double => {
            FieldValue::F64(trimmed.parse::<f64>().map_err(|e| invalid(e.to_string()))?)
        }
    };
    Ok(value)
}
