//! Sample types that can flow through stream ports

use std::fmt;

use num_complex::Complex;

use super::errors::ValueError;
use super::value::Value;

/// A plain value type carried by stream buffers
///
/// Implemented for the real, integer and complex types blocks are
/// parameterized over. `TYPE_NAME` is the parameterization string used by
/// the block registry.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn to_value(self) -> Value;

    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

macro_rules! impl_sample {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Sample for $ty {
                const TYPE_NAME: &'static str = $name;

                fn to_value(self) -> Value {
                    Value::from(self)
                }

                fn from_value(value: &Value) -> Result<Self, ValueError> {
                    <$ty as TryFrom<&Value>>::try_from(value)
                }
            }
        )*
    };
}

impl_sample! {
    f32 => "f32",
    f64 => "f64",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    Complex<f32> => "Complex<f32>",
    Complex<f64> => "Complex<f64>",
}

/// Convert a list of dynamic values into samples
pub fn samples_from_values<T: Sample>(values: &[Value]) -> Result<Vec<T>, ValueError> {
    values.iter().map(T::from_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(f32::TYPE_NAME, "f32");
        assert_eq!(<Complex<f64>>::TYPE_NAME, "Complex<f64>");
    }

    #[test]
    fn test_samples_from_values() {
        let values = vec![Value::from(1i32), Value::from(2i32)];
        assert_eq!(samples_from_values::<i32>(&values), Ok(vec![1, 2]));
        assert!(samples_from_values::<f32>(&values).is_err());
    }
}
