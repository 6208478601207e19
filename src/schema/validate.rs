//! Record validators.
//!
//! A kind's validator receives the whole record and either returns it
//! (possibly coerced) or fails with the path of the offending field.
//! [`ObjectValidator`] covers the common case of a fixed set of typed props;
//! any `Fn(Record) -> Result<Record, ValidationError>` works as well.

use crate::error::ValidationError;
use crate::types::{Record, RecordId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Validation contract every record kind supplies.
pub trait Validator: Send + Sync {
    fn validate(&self, record: Record) -> Result<Record, ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(Record) -> Result<Record, ValidationError> + Send + Sync,
{
    fn validate(&self, record: Record) -> Result<Record, ValidationError> {
        self(record)
    }
}

/// Accepts every record unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, record: Record) -> Result<Record, ValidationError> {
        Ok(record)
    }
}

/// Rule for a single field value.
#[derive(Clone, Debug)]
pub enum FieldRule {
    Any,
    String,
    Number,
    /// Whole number; integral floats are coerced to integers.
    Integer,
    Boolean,
    Literal(Value),
    /// One of a fixed set of strings.
    OneOf(Vec<String>),
    /// An id of a record of the named kind.
    Id(String),
    Nullable(Box<FieldRule>),
    /// The field may be missing entirely.
    Optional(Box<FieldRule>),
    ArrayOf(Box<FieldRule>),
    Object(ObjectValidator),
}

impl FieldRule {
    pub fn nullable(self) -> Self {
        FieldRule::Nullable(Box::new(self))
    }

    pub fn optional(self) -> Self {
        FieldRule::Optional(Box::new(self))
    }

    pub fn array_of(rule: FieldRule) -> Self {
        FieldRule::ArrayOf(Box::new(rule))
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldRule::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn id(type_name: impl Into<String>) -> Self {
        FieldRule::Id(type_name.into())
    }

    /// Check `value`, returning the coerced value.
    pub fn apply(&self, value: Value) -> Result<Value, ValidationError> {
        match self {
            FieldRule::Any => Ok(value),
            FieldRule::String => expect(value, Value::is_string, "expected a string"),
            FieldRule::Number => expect(value, Value::is_number, "expected a number"),
            FieldRule::Boolean => expect(value, Value::is_boolean, "expected a boolean"),
            FieldRule::Integer => coerce_integer(value),
            FieldRule::Literal(expected) => {
                if &value == expected {
                    Ok(value)
                } else {
                    Err(ValidationError::new("", format!("expected {}", expected)))
                }
            }
            FieldRule::OneOf(options) => match value.as_str() {
                Some(s) if options.iter().any(|o| o == s) => Ok(value),
                _ => Err(ValidationError::new(
                    "",
                    format!("expected one of [{}]", options.join(", ")),
                )),
            },
            FieldRule::Id(type_name) => match value.as_str() {
                Some(s) if RecordId::from(s).belongs_to(type_name) => Ok(value),
                _ => Err(ValidationError::new(
                    "",
                    format!("expected a {} id", type_name),
                )),
            },
            FieldRule::Nullable(inner) => {
                if value.is_null() {
                    Ok(value)
                } else {
                    inner.apply(value)
                }
            }
            FieldRule::Optional(inner) => inner.apply(value),
            FieldRule::ArrayOf(inner) => match value {
                Value::Array(items) => items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        inner
                            .apply(item)
                            .map_err(|e| e.nested(&format!("[{}]", i)))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Err(ValidationError::new("", "expected an array")),
            },
            FieldRule::Object(validator) => match value {
                Value::Object(map) => validator.check(map).map(Value::Object),
                _ => Err(ValidationError::new("", "expected an object")),
            },
        }
    }

    fn allows_missing(&self) -> bool {
        matches!(self, FieldRule::Optional(_))
    }
}

fn expect(
    value: Value,
    predicate: fn(&Value) -> bool,
    reason: &str,
) -> Result<Value, ValidationError> {
    if predicate(&value) {
        Ok(value)
    } else {
        Err(ValidationError::new("", reason))
    }
}

fn coerce_integer(value: Value) -> Result<Value, ValidationError> {
    if value.is_i64() || value.is_u64() {
        return Ok(value);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
        _ => Err(ValidationError::new("", "expected an integer")),
    }
}

/// Validates a fixed set of named fields.
///
/// Unknown fields are rejected unless [`ObjectValidator::allow_unknown`] is
/// set.
#[derive(Clone, Debug, Default)]
pub struct ObjectValidator {
    fields: BTreeMap<String, FieldRule>,
    allow_unknown: bool,
}

impl ObjectValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    pub fn allow_unknown(mut self) -> Self {
        self.allow_unknown = true;
        self
    }

    /// Validate a props map, returning the coerced map.
    pub fn check(&self, mut map: Map<String, Value>) -> Result<Map<String, Value>, ValidationError> {
        if !self.allow_unknown {
            if let Some(unknown) = map.keys().find(|k| !self.fields.contains_key(k.as_str())) {
                return Err(ValidationError::new(unknown.clone(), "unexpected property"));
            }
        }

        for (name, rule) in &self.fields {
            match map.remove(name) {
                Some(value) => {
                    let value = rule.apply(value).map_err(|e| e.nested(name))?;
                    map.insert(name.clone(), value);
                }
                None if rule.allows_missing() => {}
                None => return Err(ValidationError::new(name.clone(), "missing required property")),
            }
        }

        Ok(map)
    }
}

impl Validator for ObjectValidator {
    fn validate(&self, mut record: Record) -> Result<Record, ValidationError> {
        let props = std::mem::take(&mut record.props);
        record.props = self.check(props)?;
        Ok(record)
    }
}
