use super::types::Gid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value flowing through operations: attribute scalars, arguments and results.
///
/// Serialized adjacently tagged so the on-disk form keeps the exact type of
/// every attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Literal of an enumerated attribute.
    Enum(String),
    Node(Gid),
    Nodes(Vec<Gid>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Enum(_) => "ENUM",
            Self::Node(_) => "NODE",
            Self::Nodes(_) => "NODES",
        }
    }

    /// Truthiness used by `require`.
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::Text(s) | Self::Enum(s) => !s.is_empty(),
            Self::Node(_) => true,
            Self::Nodes(nodes) => !nodes.is_empty(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => {
                if f.is_finite() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text of a `Text` or `Enum` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Gid> {
        match self {
            Self::Node(gid) => Some(gid),
            _ => None,
        }
    }

    /// Node references held by this value; a single node counts as a
    /// one-element collection, null as an empty one.
    pub fn node_refs(&self) -> Option<Vec<Gid>> {
        match self {
            Self::Null => Some(Vec::new()),
            Self::Node(gid) => Some(vec![gid.clone()]),
            Self::Nodes(gids) => Some(gids.clone()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) | Self::Enum(s) => write!(f, "{}", s),
            Self::Node(gid) => write!(f, "<{}>", gid),
            Self::Nodes(gids) => {
                write!(f, "[")?;
                for (idx, gid) in gids.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "<{}>", gid)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Gid> for Value {
    fn from(gid: Gid) -> Self {
        Self::Node(gid)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_serialization_keeps_type_tag() {
        let encoded = serde_json::to_value(Value::Enum("severe".into())).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({"type": "Enum", "value": "severe"})
        );

        let null = serde_json::to_value(Value::Null).unwrap();
        assert_eq!(null, serde_json::json!({"type": "Null"}));
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::Float(2.9).as_i64(), Some(2));
        assert_eq!(Value::Integer(7).as_f64(), Some(7.0));
        assert_eq!(Value::Text("7".into()).as_i64(), None);
        assert_eq!(Value::Float(f64::NAN).as_i64(), None);
    }

    #[test]
    fn test_node_refs() {
        assert_eq!(Value::Null.node_refs(), Some(vec![]));
        assert_eq!(
            Value::Node(Gid::new("a")).node_refs(),
            Some(vec![Gid::new("a")])
        );
        assert_eq!(Value::Integer(1).node_refs(), None);
    }
}
