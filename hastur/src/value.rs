use std::collections::BTreeMap;

use serde::{ser::Error as _, Serialize, Serializer};

/// A set of labels attached to a message.
///
/// Keys are kept sorted so that the encoded form of a label set is stable.
pub type Labels = BTreeMap<String, Value>;

/// A freeform map of data, as carried by `reg_process`, `info_process` and `info_agent` messages.
pub type Map = BTreeMap<String, Value>;

/// A value that can be carried inside a message.
///
/// `Value` covers the full value space of the wire format. Floating-point values that are not finite (`NaN`, positive
/// or negative infinity) can be held in memory but cannot be encoded: a message containing one will fail to encode,
/// and the client reports the failure as a `log` message instead.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// An explicit null.
    #[default]
    Null,

    /// A boolean.
    Bool(bool),

    /// A signed integer.
    Int(i64),

    /// An unsigned integer.
    Uint(u64),

    /// A floating-point number.
    Float(f64),

    /// A string.
    String(String),

    /// An ordered sequence of values.
    Array(Vec<Value>),

    /// A mapping from string keys to values.
    Map(Map),
}

impl Value {
    /// Converts any serializable value into a `Value`.
    ///
    /// # Errors
    ///
    /// If `value` fails to serialize, or serializes to a map with non-string keys, an error is returned.
    pub fn from_serialize<T>(value: &T) -> Result<Value, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(value).map(Value::from)
    }

    /// Returns the string slice if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Uint(u) => serializer.serialize_u64(*u),
            Value::Float(v) => serialize_finite(v, serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(values) => values.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

/// Serializes a float, refusing values the wire format cannot represent.
///
/// `serde_json` would otherwise write non-finite floats as `null`, silently changing what the caller reported.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn serialize_finite<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        Err(S::Error::custom(format_args!("unsupported value: {value}")))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(values) => {
                Value::Array(values.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

macro_rules! impl_from_int {
    ($variant:ident, $target:ty => $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_int!(Int, i64 => i8, i16, i32, i64);
impl_from_int!(Uint, u64 => u8, u16, u32, u64);

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Uint(value as u64)
    }
}

impl From<isize> for Value {
    fn from(value: isize) -> Self {
        Value::Int(value as i64)
    }
}

/// Builds a [`Labels`] set from `key => value` pairs.
///
/// Keys can be anything convertible to `String`, and values anything convertible to [`Value`].
///
/// ```
/// let labels = hastur::labels!("region" => "us-east", "shard" => 4);
/// assert_eq!(labels.len(), 2);
/// ```
#[macro_export]
macro_rules! labels {
    () => {
        $crate::Labels::new()
    };
    ($($k:expr => $v:expr),+ $(,)?) => {{
        let mut labels = $crate::Labels::new();
        $(
            labels.insert(::std::string::String::from($k), $crate::Value::from($v));
        )+
        labels
    }};
}
