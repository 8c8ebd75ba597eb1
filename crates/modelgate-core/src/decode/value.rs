//! Decoded object graph.

use serde::Serialize;

use crate::admission::{AdmittedType, KnownType};

/// A decoded value. The caller owns the whole tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integer wider than 64 bits, little-endian two's complement.
    BigInt(Vec<u8>),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    /// A bare reference to an admitted class or function.
    Type(AdmittedType),
    Object(Box<Object>),
}

/// An instance of an admitted, non-container type.
///
/// Nothing is executed to build it: the record keeps what the stream asked
/// for (constructor arguments, `BUILD` state, appended items) so callers can
/// map it onto their own types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Object {
    pub class: AdmittedType,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kwargs: Vec<(Value, Value)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<(Value, Value)>,
}

impl Object {
    pub fn kind(&self) -> Option<KnownType> {
        self.class.kind()
    }

    /// Look up `name` in a dict-shaped `BUILD` state. A `(dict, slots)`
    /// state tuple is searched in both halves.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        let state = self.state.as_ref()?;
        match state {
            Value::Dict(_) => state.get(name),
            Value::Tuple(parts) => parts.iter().find_map(|part| part.get(name)),
            _ => None,
        }
    }
}

impl Value {
    /// Short name of the variant, for summaries and error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::ByteArray(_) => "bytearray",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::FrozenSet(_) => "frozenset",
            Self::Type(_) => "type",
            Self::Object(_) => "object",
        }
    }

    /// Dict lookup by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Dict(pairs) => pairs.iter().find_map(|(k, v)| match k {
                Self::String(s) if s == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Elements of a list, tuple, set or frozenset.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Tuple(items) | Self::Set(items) | Self::FrozenSet(items) => {
                Some(items)
            }
            _ => None,
        }
    }

    /// Number of values in this tree, including itself.
    pub fn node_count(&self) -> usize {
        1 + match self {
            Self::List(items) | Self::Tuple(items) | Self::Set(items) | Self::FrozenSet(items) => {
                items.iter().map(Value::node_count).sum()
            }
            Self::Dict(pairs) => pairs
                .iter()
                .map(|(k, v)| k.node_count() + v.node_count())
                .sum(),
            Self::Object(object) => {
                object.args.iter().map(Value::node_count).sum::<usize>()
                    + object
                        .kwargs
                        .iter()
                        .chain(object.entries.iter())
                        .map(|(k, v)| k.node_count() + v.node_count())
                        .sum::<usize>()
                    + object.state.as_ref().map_or(0, Value::node_count)
                    + object.items.iter().map(Value::node_count).sum::<usize>()
            }
            _ => 0,
        }
    }
}
