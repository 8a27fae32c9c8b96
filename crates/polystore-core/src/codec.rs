//! Schema codecs: validate inbound payloads and shape outbound rows.
//!
//! A codec is optional per adapter instance. Without one, payloads pass
//! through unchanged (apart from having to be JSON objects).

use crate::{into_row, json_type_name, FieldError, PagedResult, Row, StoreError, StoreResult, ValidateExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use validator::Validate;

/// Load/dump contract of a schema.
pub trait Codec<T>: Send + Sync {
    /// Validates and deserializes a payload. Unknown fields are dropped.
    fn load(&self, payload: Value) -> StoreResult<T>;

    /// Like [`load`](Self::load) but without required-field checks.
    fn load_partial(&self, payload: Value) -> StoreResult<T> {
        self.load(payload)
    }

    /// Serializes an item for output.
    fn dump(&self, item: &T) -> StoreResult<Value>;

    /// Loads a list of payloads, reporting failures as `[index].field`.
    fn load_many(&self, payloads: Vec<Value>) -> StoreResult<Vec<T>> {
        let mut items = Vec::with_capacity(payloads.len());
        let mut failures = Vec::new();
        for (index, payload) in payloads.into_iter().enumerate() {
            match self.load(payload) {
                Ok(item) => items.push(item),
                Err(StoreError::Validation { message, fields }) if fields.is_empty() => {
                    failures.push(FieldError::new(format!("[{index}]"), "invalid", message));
                }
                Err(StoreError::Validation { fields, .. }) => {
                    failures.extend(fields.into_iter().map(|f| FieldError {
                        field: format!("[{index}].{}", f.field),
                        ..f
                    }));
                }
                Err(other) => return Err(other),
            }
        }
        if failures.is_empty() {
            Ok(items)
        } else {
            Err(StoreError::invalid_fields(failures))
        }
    }

    /// Serializes a list of items.
    fn dump_many(&self, items: &[T]) -> StoreResult<Value> {
        items
            .iter()
            .map(|item| self.dump(item))
            .collect::<StoreResult<Vec<_>>>()
            .map(Value::Array)
    }

    /// Serializes a page: `data` through the schema, `metadata` as-is.
    fn dump_page(&self, page: &PagedResult<T>) -> StoreResult<Value> {
        Ok(json!({
            "metadata": serde_json::to_value(page.metadata)?,
            "data": self.dump_many(&page.data)?,
        }))
    }
}

/// The optional schema attached to an adapter.
#[derive(Clone, Default)]
pub struct SchemaCodec {
    schema: Option<Arc<dyn Codec<Row>>>,
}

impl SchemaCodec {
    /// A codec that passes rows through unchanged.
    #[must_use]
    pub fn identity() -> Self {
        Self { schema: None }
    }

    /// A codec backed by `schema`.
    #[must_use]
    pub fn new(schema: Arc<dyn Codec<Row>>) -> Self {
        Self { schema: Some(schema) }
    }

    /// Whether a schema is configured.
    #[must_use]
    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Validates a row before it is written.
    pub fn load_row(&self, row: &Row) -> StoreResult<Row> {
        match &self.schema {
            Some(schema) => schema.load(Value::Object(row.clone())),
            None => Ok(row.clone()),
        }
    }

    /// Validates a partial row before an update.
    pub fn load_partial_row(&self, row: &Row) -> StoreResult<Row> {
        match &self.schema {
            Some(schema) => schema.load_partial(Value::Object(row.clone())),
            None => Ok(row.clone()),
        }
    }
}

impl Codec<Row> for SchemaCodec {
    fn load(&self, payload: Value) -> StoreResult<Row> {
        match &self.schema {
            Some(schema) => schema.load(payload),
            None => into_row(payload),
        }
    }

    fn load_partial(&self, payload: Value) -> StoreResult<Row> {
        match &self.schema {
            Some(schema) => schema.load_partial(payload),
            None => into_row(payload),
        }
    }

    fn dump(&self, item: &Row) -> StoreResult<Value> {
        match &self.schema {
            Some(schema) => schema.dump(item),
            None => Ok(Value::Object(item.clone())),
        }
    }
}

impl fmt::Debug for SchemaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaCodec")
            .field("has_schema", &self.has_schema())
            .finish()
    }
}

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    Any,
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub allow_null: bool,
    pub load_only: bool,
    pub dump_only: bool,
}

impl FieldSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            allow_null: false,
            load_only: false,
            dump_only: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    /// Accepted on load, never emitted on dump.
    #[must_use]
    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    /// Emitted on dump, ignored on load.
    #[must_use]
    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    fn coerce(&self, value: Value) -> Result<Value, FieldError> {
        if value.is_null() {
            return if self.allow_null {
                Ok(Value::Null)
            } else {
                Err(FieldError::new(&self.name, "null", "Field may not be null."))
            };
        }

        let invalid = |expected: &str, got: &Value| {
            FieldError::new(
                &self.name,
                "invalid_type",
                format!("Not a valid {expected} (got {}).", json_type_name(got)),
            )
        };

        match (self.kind, value) {
            (FieldKind::Any, v) => Ok(v),
            (FieldKind::String, v @ Value::String(_)) => Ok(v),
            (FieldKind::Integer, Value::Number(n)) => match n.as_i64() {
                Some(i) => Ok(Value::from(i)),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
                    _ => Err(invalid("integer", &Value::Number(n))),
                },
            },
            (FieldKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("integer", &Value::String(s))),
            (FieldKind::Float, v @ Value::Number(_)) => Ok(v),
            (FieldKind::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("number", &Value::String(s))),
            (FieldKind::Boolean, v @ Value::Bool(_)) => Ok(v),
            (FieldKind::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(invalid("boolean", &Value::String(s))),
            },
            (FieldKind::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(1) => Ok(Value::Bool(true)),
                Some(0) => Ok(Value::Bool(false)),
                _ => Err(invalid("boolean", &Value::Number(n))),
            },
            (FieldKind::Object, v @ Value::Object(_)) => Ok(v),
            (FieldKind::Array, v @ Value::Array(_)) => Ok(v),
            (kind, v) => Err(invalid(kind_label(kind), &v)),
        }
    }
}

const fn kind_label(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::String => "string",
        FieldKind::Integer => "integer",
        FieldKind::Float => "number",
        FieldKind::Boolean => "boolean",
        FieldKind::Object => "object",
        FieldKind::Array => "array",
        FieldKind::Any => "value",
    }
}

/// A schema made of declared fields.
///
/// Load excludes undeclared fields instead of rejecting them.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    #[must_use]
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Adds a field declaration.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Returns the declared fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    fn load_with(&self, payload: Value, partial: bool) -> StoreResult<Row> {
        let mut input = into_row(payload)?;
        let mut out = Row::new();
        let mut errors = Vec::new();

        for spec in self.fields.iter().filter(|s| !s.dump_only) {
            match input.remove(&spec.name) {
                Some(value) => match spec.coerce(value) {
                    Ok(v) => {
                        out.insert(spec.name.clone(), v);
                    }
                    Err(e) => errors.push(e),
                },
                None if spec.required && !partial => errors.push(FieldError::new(
                    &spec.name,
                    "required",
                    "Missing data for required field.",
                )),
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(StoreError::invalid_fields(errors))
        }
    }
}

impl Codec<Row> for FieldSchema {
    fn load(&self, payload: Value) -> StoreResult<Row> {
        self.load_with(payload, false)
    }

    fn load_partial(&self, payload: Value) -> StoreResult<Row> {
        self.load_with(payload, true)
    }

    fn dump(&self, item: &Row) -> StoreResult<Value> {
        let mut out = Row::new();
        for spec in self.fields.iter().filter(|s| !s.load_only) {
            if let Some(value) = item.get(&spec.name) {
                out.insert(spec.name.clone(), value.clone());
            }
        }
        Ok(Value::Object(out))
    }
}

/// A schema backed by a `serde` + `validator` type.
///
/// Loading deserializes into `T` (serde ignores unknown fields unless `T`
/// says otherwise), runs `T::validate` and serializes back to a row.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate,
{
    /// Loads a payload into the typed value.
    pub fn load_typed(&self, payload: Value) -> StoreResult<T> {
        let item: T = serde_json::from_value(payload).map_err(|e| StoreError::validation(e.to_string()))?;
        item.validate_request()?;
        Ok(item)
    }
}

impl<T> Codec<Row> for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate,
{
    fn load(&self, payload: Value) -> StoreResult<Row> {
        let item = self.load_typed(payload)?;
        into_row(serde_json::to_value(item)?)
    }

    fn dump(&self, item: &Row) -> StoreResult<Value> {
        let typed: T = serde_json::from_value(Value::Object(item.clone()))?;
        Ok(serde_json::to_value(typed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageMetadata, PageRequest};
    use serde::Deserialize;

    fn person_schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldSpec::new("_id", FieldKind::String).dump_only(),
            FieldSpec::new("name", FieldKind::String).required(),
            FieldSpec::new("age", FieldKind::Integer),
            FieldSpec::new("active", FieldKind::Boolean),
            FieldSpec::new("password", FieldKind::String).load_only(),
        ])
    }

    fn row(value: Value) -> Row {
        into_row(value).unwrap()
    }

    #[test]
    fn test_identity_codec_passes_rows_through() {
        let codec = SchemaCodec::identity();
        let loaded = codec.load(json!({"name": "a", "extra": true})).unwrap();
        assert_eq!(loaded, row(json!({"name": "a", "extra": true})));
        assert_eq!(codec.dump(&loaded).unwrap(), json!({"name": "a", "extra": true}));
    }

    #[test]
    fn test_load_excludes_unknown_fields() {
        let loaded = person_schema()
            .load(json!({"name": "ann", "age": 31, "nickname": "a"}))
            .unwrap();
        assert_eq!(loaded, row(json!({"name": "ann", "age": 31})));
    }

    #[test]
    fn test_load_ignores_dump_only_fields() {
        let loaded = person_schema()
            .load(json!({"_id": "abc", "name": "ann"}))
            .unwrap();
        assert!(!loaded.contains_key("_id"));
    }

    #[test]
    fn test_load_reports_every_failing_field() {
        let err = person_schema().load(json!({"age": "old", "active": "maybe"})).unwrap_err();
        let fields: Vec<&str> = err.field_errors().iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "age", "active"]);
    }

    #[test]
    fn test_load_coerces_strings() {
        let loaded = person_schema()
            .load(json!({"name": "ann", "age": "31", "active": "true"}))
            .unwrap();
        assert_eq!(loaded["age"], json!(31));
        assert_eq!(loaded["active"], json!(true));
    }

    #[test]
    fn test_null_rejected_unless_allowed() {
        let err = person_schema().load(json!({"name": null})).unwrap_err();
        assert_eq!(err.field_errors()[0].code, "null");

        let schema = FieldSchema::default().field(FieldSpec::new("note", FieldKind::String).allow_null());
        assert_eq!(schema.load(json!({"note": null})).unwrap()["note"], Value::Null);
    }

    #[test]
    fn test_partial_load_skips_required() {
        let loaded = person_schema().load_partial(json!({"age": 4})).unwrap();
        assert_eq!(loaded, row(json!({"age": 4})));
    }

    #[test]
    fn test_dump_omits_load_only_and_undeclared() {
        let dumped = person_schema()
            .dump(&row(json!({"_id": "1", "name": "ann", "password": "x", "internal": 1})))
            .unwrap();
        assert_eq!(dumped, json!({"_id": "1", "name": "ann"}));
    }

    #[test]
    fn test_load_many_indexes_failures() {
        let err = person_schema()
            .load_many(vec![json!({"name": "a"}), json!({"age": 2})])
            .unwrap_err();
        assert_eq!(err.field_errors()[0].field, "[1].name");
    }

    #[test]
    fn test_dump_page_keeps_metadata_literal() {
        let page = PagedResult::new(
            PageMetadata { total_elements: 3, page: 2, per_page: 2 },
            vec![row(json!({"_id": "3", "name": "c", "password": "p"}))],
        );
        let dumped = person_schema().dump_page(&page).unwrap();
        assert_eq!(
            dumped,
            json!({
                "metadata": {"total_elements": 3, "page": 2, "per_page": 2},
                "data": [{"_id": "3", "name": "c"}]
            })
        );
    }

    #[test]
    fn test_schema_codec_dump_page_without_schema() {
        let page = PagedResult::from_all(vec![row(json!({"a": 1}))], Some(PageRequest::new(1, 5).unwrap()));
        let dumped = SchemaCodec::identity().dump_page(&page).unwrap();
        assert_eq!(dumped["data"], json!([{"a": 1}]));
        assert_eq!(dumped["metadata"]["per_page"], json!(5));
    }

    #[derive(Debug, Serialize, Deserialize, Validate)]
    struct Product {
        #[validate(length(min = 1, max = 40))]
        name: String,
        #[validate(range(min = 0))]
        stock: i64,
        #[serde(default, skip_serializing)]
        cost: Option<f64>,
    }

    #[test]
    fn test_typed_schema_load() {
        let schema = TypedSchema::<Product>::new();
        let loaded = schema.load(json!({"name": "bolt", "stock": 4, "color": "red"})).unwrap();
        assert_eq!(loaded, row(json!({"name": "bolt", "stock": 4})));
    }

    #[test]
    fn test_typed_schema_validation_failure() {
        let schema = TypedSchema::<Product>::new();
        let err = schema.load(json!({"name": "", "stock": -1})).unwrap_err();
        let mut fields: Vec<String> = err.field_errors().iter().map(|f| f.field.clone()).collect();
        fields.sort();
        assert_eq!(fields, vec!["name", "stock"]);
    }

    #[test]
    fn test_typed_schema_dump_hides_internal_fields() {
        let schema = TypedSchema::<Product>::new();
        let dumped = schema.dump(&row(json!({"name": "bolt", "stock": 1, "cost": 0.5}))).unwrap();
        assert_eq!(dumped, json!({"name": "bolt", "stock": 1}));
    }

    #[test]
    fn test_schema_codec_wraps_schema() {
        let codec = SchemaCodec::new(Arc::new(person_schema()));
        assert!(codec.has_schema());
        let loaded = codec.load_row(&row(json!({"name": "x", "junk": 1}))).unwrap();
        assert_eq!(loaded, row(json!({"name": "x"})));
        assert!(codec.load_row(&row(json!({"age": 1}))).is_err());
        assert!(codec.load_partial_row(&row(json!({"age": 1}))).is_ok());
    }
}
