//! Dynamically typed values for settings, tags and control messages

use std::collections::BTreeMap;
use std::fmt;

use num_complex::Complex;

use super::errors::ValueError;

/// Ordered string-keyed map of dynamic values
pub type PropertyMap = BTreeMap<String, Value>;

/// A dynamically typed value
///
/// Conversions out of a `Value` are strict: an `I32` never silently becomes an
/// `I64` or `F32`. Mismatches surface as [`ValueError::TypeMismatch`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    ComplexF32(Complex<f32>),
    ComplexF64(Complex<f64>),
    String(String),
    Vector(Vec<Value>),
    Map(PropertyMap),
}

impl Value {
    /// Short name of the contained type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::ComplexF32(_) => "Complex<f32>",
            Value::ComplexF64(_) => "Complex<f64>",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_slice(&self) -> Result<&[Value], ValueError> {
        match self {
            Value::Vector(v) => Ok(v),
            other => Err(other.mismatch("vector")),
        }
    }

    pub fn as_map(&self) -> Result<&PropertyMap, ValueError> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    /// Build a `Vector` from anything convertible into values
    pub fn vector<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Vector(items.into_iter().map(Into::into).collect())
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl TryFrom<&Value> for $ty {
                type Error = ValueError;

                fn try_from(value: &Value) -> Result<Self, ValueError> {
                    match value {
                        Value::$variant(v) => Ok(v.clone()),
                        other => Err(other.mismatch($name)),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool, "bool";
    i8 => I8, "i8";
    i16 => I16, "i16";
    i32 => I32, "i32";
    i64 => I64, "i64";
    u8 => U8, "u8";
    u16 => U16, "u16";
    u32 => U32, "u32";
    u64 => U64, "u64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    Complex<f32> => ComplexF32, "Complex<f32>";
    Complex<f64> => ComplexF64, "Complex<f64>";
    String => String, "string";
    Vec<Value> => Vector, "vector";
    PropertyMap => Map, "map";
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::ComplexF32(v) => write!(f, "{v}"),
            Value::ComplexF64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => write_map(f, map),
        }
    }
}

/// Format a property map as `{key: value, ...}`
pub(crate) fn write_map(f: &mut fmt::Formatter, map: &PropertyMap) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{key}: {value}")?;
    }
    write!(f, "}}")
}

/// Look up `key` in `map` and convert it to `T`
pub fn property<T>(map: &PropertyMap, key: &str) -> Result<T, ValueError>
where
    T: for<'a> TryFrom<&'a Value, Error = ValueError>,
{
    let value = map
        .get(key)
        .ok_or_else(|| ValueError::KeyNotFound(key.to_string()))?;
    T::try_from(value)
}

/// Build a [`PropertyMap`] from `key => value` pairs
///
/// ```
/// use flowgraph::property_map;
///
/// let map = property_map! { "state" => "REQUESTED_STOP", "count" => 3u64 };
/// assert_eq!(map.len(), 2);
/// ```
#[macro_export]
macro_rules! property_map {
    () => {
        $crate::PropertyMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::PropertyMap::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_conversion() {
        let v = Value::from(42i32);
        assert_eq!(i32::try_from(&v), Ok(42));
        assert_eq!(
            i64::try_from(&v),
            Err(ValueError::TypeMismatch {
                expected: "i64",
                found: "i32"
            })
        );
        assert!(f32::try_from(&v).is_err());
    }

    #[test]
    fn test_complex_values() {
        let c = Complex::new(1.0f32, -2.0);
        let v = Value::from(c);
        assert_eq!(v.type_name(), "Complex<f32>");
        assert_eq!(Complex::<f32>::try_from(&v), Ok(c));
        assert!(Complex::<f64>::try_from(&v).is_err());
    }

    #[test]
    fn test_property_lookup() {
        let map = crate::property_map! { "num_items" => 10u64, "name" => "head" };
        assert_eq!(property::<u64>(&map, "num_items"), Ok(10));
        assert_eq!(property::<String>(&map, "name"), Ok("head".to_string()));
        assert_eq!(
            property::<u64>(&map, "missing"),
            Err(ValueError::KeyNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_display() {
        let v = Value::Map(crate::property_map! { "a" => 1i32, "b" => Value::vector([1u8, 2]) });
        assert_eq!(v.to_string(), "{a: 1, b: [1, 2]}");
    }
}
