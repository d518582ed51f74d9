//! Field schema registry.
//!
//! Fields are registered once, before any indexing starts, on a mutable
//! [`SchemaRegistry`]. [`SchemaRegistry::freeze`] turns it into an
//! immutable [`IndexSchema`] holding the tantivy schema and field handles;
//! everything downstream shares that frozen schema behind an `Arc`.
//!
//! Two system fields are always present:
//! - `__NodeId`: record identity (STRING | STORED)
//! - `__IndexType`: record type (STRING | STORED)

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tantivy::schema::{
    DateOptions, Field, FieldType, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing,
    TextOptions, STORED, STRING,
};

use quarry_types::{FieldSettings, RecordType};

use crate::error::{SchemaError, SearchError, UnknownFieldError};

/// Reserved field holding the record identity.
pub const NODE_ID_FIELD: &str = "__NodeId";

/// Reserved field holding the record type.
pub const RECORD_TYPE_FIELD: &str = "__IndexType";

const RESERVED_PREFIX: &str = "__";

/// Date component extracted by the `Date.*` transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateComponent {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl DateComponent {
    pub fn extract(&self, value: &DateTime<Utc>) -> i64 {
        match self {
            DateComponent::Year => value.year() as i64,
            DateComponent::Month => value.month() as i64,
            DateComponent::Day => value.day() as i64,
            DateComponent::Hour => value.hour() as i64,
            DateComponent::Minute => value.minute() as i64,
        }
    }
}

/// Engine value type a field is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    I64,
    F64,
    Date,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::I64 => "integer",
            FieldKind::F64 => "floating point",
            FieldKind::Date => "date",
        }
    }
}

/// How a raw string value is turned into an indexed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTransform {
    /// Raw string stored as-is
    Text,
    /// Full date/time value
    DateTime,
    /// One integer component of a date/time value
    DatePart(DateComponent),
    /// 32-bit integer
    Number,
    Long,
    Float,
    Double,
}

impl FieldTransform {
    /// Parse a transform expression. `None` or an empty string is a plain
    /// text field; unknown expressions return `None`.
    pub fn parse(expression: Option<&str>) -> Option<Self> {
        let expr = match expression.map(str::trim) {
            None | Some("") => return Some(FieldTransform::Text),
            Some(expr) => expr,
        };
        let transform = match expr {
            "DateTime" => FieldTransform::DateTime,
            "Date.Year" => FieldTransform::DatePart(DateComponent::Year),
            "Date.Month" => FieldTransform::DatePart(DateComponent::Month),
            "Date.Day" => FieldTransform::DatePart(DateComponent::Day),
            "Date.Hour" => FieldTransform::DatePart(DateComponent::Hour),
            "Date.Minute" => FieldTransform::DatePart(DateComponent::Minute),
            "Number" => FieldTransform::Number,
            "Long" => FieldTransform::Long,
            "Float" => FieldTransform::Float,
            "Double" => FieldTransform::Double,
            _ => return None,
        };
        Some(transform)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldTransform::Text => FieldKind::Text,
            FieldTransform::DateTime => FieldKind::Date,
            FieldTransform::DatePart(_) | FieldTransform::Number | FieldTransform::Long => {
                FieldKind::I64
            }
            FieldTransform::Float | FieldTransform::Double => FieldKind::F64,
        }
    }
}

/// Engine storage behaviour of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageFlags {
    pub indexed: bool,
    pub stored: bool,
    /// Backed by a fast (columnar) field
    pub sortable: bool,
}

impl Default for StorageFlags {
    fn default() -> Self {
        Self {
            indexed: true,
            stored: true,
            sortable: false,
        }
    }
}

/// A field declaration as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    /// Raw field to read (defaults to `name`)
    pub source: Option<String>,
    /// Transform expression, validated on registration
    pub field_type: Option<String>,
    pub flags: StorageFlags,
    /// Record types this field applies to (empty = all)
    pub record_types: Vec<String>,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            field_type: None,
            flags: StorageFlags::default(),
            record_types: Vec::new(),
        }
    }

    /// Transform expression such as `Number` or `Date.Year`.
    pub fn with_type(mut self, field_type: impl Into<String>) -> Self {
        self.field_type = Some(field_type.into());
        self
    }

    /// Read the value from another record field.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Replace all storage flags at once.
    pub fn with_flags(mut self, flags: StorageFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Shorthand for setting the sortable flag.
    pub fn sortable(mut self) -> Self {
        self.flags.sortable = true;
        self
    }

    /// Restrict the field to these record types. Empty means all.
    pub fn for_record_types<I, S>(mut self, record_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_types = record_types.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&FieldSettings> for FieldDefinition {
    fn from(settings: &FieldSettings) -> Self {
        Self {
            name: settings.name.clone(),
            source: settings.source.clone(),
            field_type: settings.field_type.clone(),
            flags: StorageFlags {
                indexed: true,
                stored: settings.stored,
                sortable: settings.sortable,
            },
            record_types: settings.record_types.clone(),
        }
    }
}

/// A field that passed registration, with its parsed transform.
#[derive(Debug, Clone)]
pub struct RegisteredField {
    definition: FieldDefinition,
    transform: FieldTransform,
}

impl RegisteredField {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Raw field the value is read from.
    pub fn source(&self) -> &str {
        self.definition
            .source
            .as_deref()
            .unwrap_or(&self.definition.name)
    }

    pub fn transform(&self) -> FieldTransform {
        self.transform
    }

    pub fn kind(&self) -> FieldKind {
        self.transform.kind()
    }

    pub fn flags(&self) -> StorageFlags {
        self.definition.flags
    }

    pub fn definition(&self) -> &FieldDefinition {
        &self.definition
    }

    pub fn applies_to(&self, record_type: &RecordType) -> bool {
        self.definition.record_types.is_empty()
            || self
                .definition
                .record_types
                .iter()
                .any(|t| t == record_type.as_str())
    }
}

/// Mutable registry of fields and record types, used before indexing.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    fields: Vec<RegisteredField>,
    by_name: HashMap<String, usize>,
    record_types: Vec<RecordType>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration.
    pub fn from_settings(
        record_types: &[String],
        fields: &[FieldSettings],
    ) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        for name in record_types {
            registry.register_record_type(RecordType::new(name.as_str()))?;
        }
        for field in fields {
            registry.register(FieldDefinition::from(field))?;
        }
        Ok(registry)
    }

    /// Register a field.
    ///
    /// Fails on duplicate or reserved names and on unknown transforms.
    pub fn register(&mut self, mut definition: FieldDefinition) -> Result<(), SchemaError> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(SchemaError::ReservedName(name));
        }
        if self.by_name.contains_key(&name) {
            return Err(SchemaError::DuplicateField(name));
        }
        let transform = FieldTransform::parse(definition.field_type.as_deref()).ok_or_else(|| {
            SchemaError::UnknownTransform {
                field: name.clone(),
                expression: definition.field_type.clone().unwrap_or_default(),
            }
        })?;

        definition.name = name.clone();
        self.by_name.insert(name, self.fields.len());
        self.fields.push(RegisteredField {
            definition,
            transform,
        });
        Ok(())
    }

    pub fn register_record_type(&mut self, record_type: RecordType) -> Result<(), SchemaError> {
        if self.record_types.contains(&record_type) {
            return Err(SchemaError::DuplicateRecordType(record_type.to_string()));
        }
        self.record_types.push(record_type);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredField, UnknownFieldError> {
        self.by_name
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| UnknownFieldError::new(name))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn record_types(&self) -> &[RecordType] {
        &self.record_types
    }

    /// Freeze the registry and build the engine schema.
    pub fn freeze(self) -> Result<IndexSchema, SchemaError> {
        for field in &self.fields {
            for rt in &field.definition.record_types {
                if !self.record_types.iter().any(|t| t.as_str() == rt) {
                    return Err(SchemaError::UnknownRecordType {
                        field: field.name().to_string(),
                        record_type: rt.clone(),
                    });
                }
            }
        }

        let mut builder = Schema::builder();
        let node_id = builder.add_text_field(NODE_ID_FIELD, STRING | STORED);
        let record_type = builder.add_text_field(RECORD_TYPE_FIELD, STRING | STORED);

        let handles = self
            .fields
            .iter()
            .map(|field| add_engine_field(&mut builder, field))
            .collect();

        Ok(IndexSchema {
            schema: builder.build(),
            fields: self.fields,
            by_name: self.by_name,
            handles,
            record_types: self.record_types,
            node_id,
            record_type,
        })
    }
}

fn add_engine_field(builder: &mut tantivy::schema::SchemaBuilder, field: &RegisteredField) -> Field {
    let flags = field.flags();
    match field.kind() {
        FieldKind::Text => {
            let mut options = TextOptions::default();
            if flags.indexed {
                options = options.set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer("default")
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                );
            }
            if flags.stored {
                options = options.set_stored();
            }
            if flags.sortable {
                options = options.set_fast(Some("raw"));
            }
            builder.add_text_field(field.name(), options)
        }
        FieldKind::I64 => builder.add_i64_field(field.name(), numeric_options(flags)),
        FieldKind::F64 => builder.add_f64_field(field.name(), numeric_options(flags)),
        FieldKind::Date => {
            let mut options = DateOptions::default();
            if flags.indexed {
                options = options.set_indexed();
            }
            if flags.stored {
                options = options.set_stored();
            }
            if flags.sortable {
                options = options.set_fast();
            }
            builder.add_date_field(field.name(), options)
        }
    }
}

fn numeric_options(flags: StorageFlags) -> NumericOptions {
    let mut options = NumericOptions::default();
    if flags.indexed {
        options = options.set_indexed();
    }
    if flags.stored {
        options = options.set_stored();
    }
    if flags.sortable {
        options = options.set_fast();
    }
    options
}

/// Frozen schema shared by the mapper, writer and query builder.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    fields: Vec<RegisteredField>,
    by_name: HashMap<String, usize>,
    handles: Vec<Field>,
    record_types: Vec<RecordType>,
    node_id: Field,
    record_type: Field,
}

impl IndexSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn node_id_field(&self) -> Field {
        self.node_id
    }

    pub fn record_type_field(&self) -> Field {
        self.record_type
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredField, UnknownFieldError> {
        self.lookup(name).map(|(_, f)| f)
    }

    /// Engine handle and declaration for a declared field.
    pub fn lookup(&self, name: &str) -> Result<(Field, &RegisteredField), UnknownFieldError> {
        self.by_name
            .get(name)
            .map(|&i| (self.handles[i], &self.fields[i]))
            .ok_or_else(|| UnknownFieldError::new(name))
    }

    pub fn record_types(&self) -> &[RecordType] {
        &self.record_types
    }

    pub fn has_record_type(&self, record_type: &RecordType) -> bool {
        self.record_types.contains(record_type)
    }

    /// Declared fields applying to `record_type`, with their handles.
    pub fn fields_for<'a>(
        &'a self,
        record_type: &'a RecordType,
    ) -> impl Iterator<Item = (Field, &'a RegisteredField)> + 'a {
        self.handles
            .iter()
            .copied()
            .zip(self.fields.iter())
            .filter(move |(_, f)| f.applies_to(record_type))
    }

    /// Number of declared (non-reserved) fields.
    pub fn declared_len(&self) -> usize {
        self.fields.len()
    }

    /// All field names in the engine schema, reserved ones included.
    pub fn field_names(&self) -> Vec<&str> {
        self.schema.fields().map(|(_, entry)| entry.name()).collect()
    }

    /// Check that an existing engine schema matches this one.
    pub fn verify(&self, existing: &Schema) -> Result<(), SearchError> {
        for (name, expected) in [(NODE_ID_FIELD, self.node_id), (RECORD_TYPE_FIELD, self.record_type)]
        {
            let found = existing
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))?;
            if found != expected {
                return Err(SearchError::SchemaMismatch(format!(
                    "{} field moved",
                    name
                )));
            }
        }

        for (handle, field) in self.handles.iter().zip(self.fields.iter()) {
            let found = existing.get_field(field.name()).map_err(|_| {
                SearchError::SchemaMismatch(format!("missing {} field", field.name()))
            })?;
            let kind_matches = match existing.get_field_entry(found).field_type() {
                FieldType::Str(_) => field.kind() == FieldKind::Text,
                FieldType::I64(_) => field.kind() == FieldKind::I64,
                FieldType::F64(_) => field.kind() == FieldKind::F64,
                FieldType::Date(_) => field.kind() == FieldKind::Date,
                _ => false,
            };
            if found != *handle || !kind_matches {
                return Err(SearchError::SchemaMismatch(format!(
                    "field {} does not match its declaration",
                    field.name()
                )));
            }
        }
        Ok(())
    }
}
