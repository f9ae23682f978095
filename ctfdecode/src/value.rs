use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::sync::Arc;

/// A decoded integer, keeping the signedness declared by its type.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum Integer {
    Unsigned(u64),
    Signed(i64),
}

impl Integer {
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Integer::Unsigned(v) => Some(v),
            Integer::Signed(v) if v >= 0 => Some(v as u64),
            Integer::Signed(_) => None,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Integer::Unsigned(v) if v <= i64::MAX as u64 => Some(v as i64),
            Integer::Unsigned(_) => None,
            Integer::Signed(v) => Some(v),
        }
    }

    pub fn as_i128(self) -> i128 {
        match self {
            Integer::Unsigned(v) => i128::from(v),
            Integer::Signed(v) => i128::from(v),
        }
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Integer::Unsigned(v) => write!(f, "{}", v),
            Integer::Signed(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for Integer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Integer::Unsigned(v) => serializer.serialize_u64(v),
            Integer::Signed(v) => serializer.serialize_i64(v),
        }
    }
}

/// A node of a decoded value tree.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Integer(Integer),
    /// An enumeration keeps its raw value; `label` is the mapping it falls
    /// into, if any.
    Enum {
        value: Integer,
        label: Option<Arc<str>>,
    },
    /// Floating point values are skipped over but not materialized.
    Float,
    String(String),
    Struct(StructValue),
    Array(Vec<Value>),
    /// The one member of a variant that is present.
    Variant { tag: Arc<str>, value: Box<Value> },
}

impl Value {
    /// The integer behind an integer or enumeration value.
    pub fn as_integer(&self) -> Option<Integer> {
        match *self {
            Value::Integer(int) => Some(int),
            Value::Enum { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(Integer::as_u64)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_integer().and_then(Integer::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Value::Enum { label, .. } => label.as_deref(),
            _ => None,
        }
    }

    /// The selected member of a variant.
    pub fn as_variant(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Variant { tag, value } => Some((&**tag, &**value)),
            _ => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::Integer(Integer::Unsigned(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Integer(Integer::Signed(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<StructValue> for Value {
    fn from(s: StructValue) -> Value {
        Value::Struct(s)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(int) => int.serialize(serializer),
            Value::Enum { value, label } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("value", value)?;
                map.serialize_entry("label", &label.as_deref())?;
                map.end()
            }
            Value::Float => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Struct(s) => s.serialize(serializer),
            Value::Array(elements) => elements.serialize(serializer),
            Value::Variant { tag, value } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(&**tag, &**value)?;
                map.end()
            }
        }
    }
}

/// The decoded fields of a structure, in declaration order. Field lookups
/// by name are how sequences and variants find their length and tag.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct StructValue {
    fields: Vec<(Arc<str>, Value)>,
}

impl StructValue {
    pub fn new() -> StructValue {
        StructValue::default()
    }

    pub fn with_capacity(capacity: usize) -> StructValue {
        StructValue {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: Arc<str>, value: Value) {
        self.fields.push((name, value));
    }

    /// Builder-style `push`.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> StructValue {
        self.push(Arc::from(name), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| &**field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.fields.iter().map(|(name, value)| (&**name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for StructValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(&**name, value)?;
        }
        map.end()
    }
}
