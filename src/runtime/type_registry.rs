//! Type registry for dynamic buffer creation
//!
//! Connections are recorded with only the `TypeId` of the stream. When a
//! flowgraph is initialised the registry materializes a typed producer and
//! consumer pair for each connection behind the [`ErasedProducer`] and
//! [`ErasedConsumer`] interfaces.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use num_complex::Complex;

use super::buffer::{ErasedConsumer, ErasedProducer, erased_stream_buffer};
use super::sample::Sample;

pub(crate) type ErasedBufferPair = (Box<dyn ErasedProducer>, Box<dyn ErasedConsumer>);

type BufferCreatorFn = Box<dyn Fn(usize) -> ErasedBufferPair + Send + Sync>;

struct RegisteredType {
    name: &'static str,
    create: BufferCreatorFn,
}

pub(crate) struct TypeRegistry {
    types: HashMap<TypeId, RegisteredType>,
}

impl TypeRegistry {
    fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Register a type for use in stream buffers
    fn register<T: Sample>(&mut self) {
        self.types.insert(
            TypeId::of::<T>(),
            RegisteredType {
                name: T::TYPE_NAME,
                create: Box::new(erased_stream_buffer::<T>),
            },
        );
    }

    pub(crate) fn is_registered(&self, type_id: TypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    pub(crate) fn create_buffer(
        &self,
        type_id: TypeId,
        capacity: usize,
    ) -> Option<ErasedBufferPair> {
        self.types.get(&type_id).map(|t| (t.create)(capacity))
    }

    fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.types.values().map(|t| t.name).collect();
        names.sort_unstable();
        names
    }
}

// Global type registry
lazy_static::lazy_static! {
    pub(crate) static ref TYPE_REGISTRY: RwLock<TypeRegistry> = {
        let mut registry = TypeRegistry::new();

        registry.register::<f32>();
        registry.register::<f64>();
        registry.register::<i8>();
        registry.register::<i16>();
        registry.register::<i32>();
        registry.register::<i64>();
        registry.register::<u8>();
        registry.register::<u16>();
        registry.register::<u32>();
        registry.register::<u64>();
        registry.register::<Complex<f32>>();
        registry.register::<Complex<f64>>();

        RwLock::new(registry)
    };
}

/// Register a custom sample type for use in flowgraphs
/// Call this before connecting ports that carry the type
pub fn register_type<T: Sample>() {
    TYPE_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register::<T>();
}

/// Names of every sample type that can flow through a connection
pub fn registered_type_names() -> Vec<&'static str> {
    TYPE_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .names()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::errors::ValueError;
    use crate::runtime::value::Value;

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Iq8 {
        i: i8,
        q: i8,
    }

    impl Sample for Iq8 {
        const TYPE_NAME: &'static str = "Iq8";

        fn to_value(self) -> Value {
            Value::vector([self.i, self.q])
        }

        fn from_value(value: &Value) -> Result<Self, ValueError> {
            match value.as_slice()? {
                [i, q] => Ok(Iq8 {
                    i: i8::try_from(i)?,
                    q: i8::try_from(q)?,
                }),
                _ => Err(ValueError::TypeMismatch {
                    expected: "Iq8",
                    found: value.type_name(),
                }),
            }
        }
    }

    #[test]
    fn test_builtin_types_registered() {
        let names = registered_type_names();
        assert!(names.contains(&"f32"));
        assert!(names.contains(&"Complex<f64>"));
    }

    #[test]
    fn test_register_custom_type() {
        register_type::<Iq8>();
        let registry = TYPE_REGISTRY.read().unwrap();
        let (producer, consumer) = registry
            .create_buffer(TypeId::of::<Iq8>(), 8)
            .expect("registered");
        assert_eq!(producer.sample_type(), "Iq8");
        assert_eq!(consumer.sample_type(), "Iq8");
        assert_eq!(producer.space(), 8);
    }
}
