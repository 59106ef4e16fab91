//! Port schemas and the type-erased port wrappers handed to `work()`
//!
//! A block declares its ports as [`PortSchema`]s. The graph turns each
//! declared port into an [`InputPort`] or [`OutputPort`], and the scheduler
//! hands each connection's producer half to the output and its consumer half
//! to the input when the flowgraph is initialised. Inside `work()` a block
//! asks for a typed [`StreamReader`] / [`StreamWriter`].

use std::any::TypeId;
use std::fmt;

pub use super::errors::{ConnectionError, PortError};

use super::buffer::{ErasedConsumer, ErasedProducer, StreamConsumer, StreamProducer};
use super::receiver::StreamReader;
use super::sample::Sample;
use super::sender::StreamWriter;

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Schema describing a port's metadata
#[derive(Debug, Clone)]
pub struct PortSchema {
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub index: usize,
    pub direction: PortDirection,
    /// Optional inputs may be left unconnected
    pub optional: bool,
}

impl PortSchema {
    /// Create a new port schema with type information
    pub fn new<T: Sample>(name: impl Into<String>, index: usize, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: T::TYPE_NAME,
            index,
            direction,
            optional: false,
        }
    }

    pub fn input<T: Sample>(name: impl Into<String>, index: usize) -> Self {
        Self::new::<T>(name, index, PortDirection::Input)
    }

    pub fn output<T: Sample>(name: impl Into<String>, index: usize) -> Self {
        Self::new::<T>(name, index, PortDirection::Output)
    }

    /// Mark the port as allowed to stay unconnected
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Reference to a port by name or by position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    Name(String),
    Index(usize),
}

impl PortRef {
    /// Resolve against a list of schemas, returning the port's position
    pub fn resolve(&self, schemas: &[PortSchema]) -> Option<usize> {
        match self {
            PortRef::Name(name) => schemas.iter().position(|s| &s.name == name),
            PortRef::Index(index) => (*index < schemas.len()).then_some(*index),
        }
    }
}

impl From<&str> for PortRef {
    fn from(name: &str) -> Self {
        PortRef::Name(name.to_string())
    }
}

impl From<String> for PortRef {
    fn from(name: String) -> Self {
        PortRef::Name(name)
    }
}

impl From<usize> for PortRef {
    fn from(index: usize) -> Self {
        PortRef::Index(index)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortRef::Name(name) => write!(f, "{name}"),
            PortRef::Index(index) => write!(f, "#{index}"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Type-erased port wrappers
// ────────────────────────────────────────────────────────────────────────────

fn mismatch<T: Sample>(schema: &PortSchema) -> PortError {
    PortError::TypeMismatch {
        port: schema.name.clone(),
        actual: schema.type_name,
        requested: T::TYPE_NAME,
    }
}

/// Type-erased input port owning the reading half of at most one buffer
pub struct InputPort {
    schema: PortSchema,
    consumer: Option<Box<dyn ErasedConsumer>>,
}

impl InputPort {
    pub(crate) fn new(schema: PortSchema) -> Self {
        Self {
            schema,
            consumer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &PortSchema {
        &self.schema
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_some()
    }

    /// Get a typed reader for this port
    pub fn reader<T: Sample>(&mut self) -> Result<StreamReader<'_, T>, PortError> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| PortError::NotConnected(self.schema.name.clone()))?;
        let consumer = consumer
            .as_any_mut()
            .downcast_mut::<StreamConsumer<T>>()
            .ok_or_else(|| mismatch::<T>(&self.schema))?;
        Ok(StreamReader::new(consumer))
    }

    /// Samples ready to read, zero when unconnected
    pub fn available(&self) -> usize {
        self.consumer.as_ref().map_or(0, |c| c.available())
    }

    /// Connected, closed upstream and fully read
    pub fn is_exhausted(&self) -> bool {
        self.consumer.as_ref().is_some_and(|c| c.is_exhausted())
    }

    pub(crate) fn bind(&mut self, consumer: Box<dyn ErasedConsumer>) {
        self.consumer = Some(consumer);
    }

    pub(crate) fn unbind(&mut self) {
        self.consumer = None;
    }

    /// Tell the upstream writer this port will not read again
    pub(crate) fn detach(&self) {
        if let Some(consumer) = &self.consumer {
            consumer.detach();
        }
    }
}

impl fmt::Debug for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "InputPort[{}: {}, available={}]",
            self.schema.name,
            self.schema.type_name,
            self.available()
        )
    }
}

/// Type-erased output port owning the writing half of every buffer it feeds
pub struct OutputPort {
    schema: PortSchema,
    producers: Vec<Box<dyn ErasedProducer>>,
}

impl OutputPort {
    pub(crate) fn new(schema: PortSchema) -> Self {
        Self {
            schema,
            producers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &PortSchema {
        &self.schema
    }

    pub fn is_connected(&self) -> bool {
        !self.producers.is_empty()
    }

    /// Get a typed writer publishing to every connected input
    pub fn writer<T: Sample>(&mut self) -> Result<StreamWriter<'_, T>, PortError> {
        let schema = &self.schema;
        let destinations = self
            .producers
            .iter_mut()
            .map(|producer| {
                producer
                    .as_any_mut()
                    .downcast_mut::<StreamProducer<T>>()
                    .ok_or_else(|| mismatch::<T>(schema))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StreamWriter::new(destinations))
    }

    /// Samples that fit into every live reader, unbounded when unconnected
    pub fn space(&self) -> usize {
        if self.producers.is_empty() {
            return usize::MAX;
        }
        self.producers
            .iter()
            .filter(|p| !p.is_detached())
            .map(|p| p.space())
            .min()
            .unwrap_or(0)
    }

    /// Every reader has detached. True for an unconnected port.
    pub fn all_detached(&self) -> bool {
        self.producers.iter().all(|p| p.is_detached())
    }

    pub(crate) fn attach(&mut self, producer: Box<dyn ErasedProducer>) {
        self.producers.push(producer);
    }

    pub(crate) fn unbind(&mut self) {
        self.producers.clear();
    }

    /// Signal end of stream to every reader
    pub(crate) fn close(&self) {
        for producer in &self.producers {
            producer.close();
        }
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "OutputPort[{}: {}, destinations={}]",
            self.schema.name,
            self.schema.type_name,
            self.producers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer::{erased_stream_buffer, stream_buffer};

    #[test]
    fn test_port_ref_resolution() {
        let schemas = vec![
            PortSchema::input::<f32>("in", 0),
            PortSchema::input::<f32>("aux", 1).optional(),
        ];
        assert_eq!(PortRef::from("aux").resolve(&schemas), Some(1));
        assert_eq!(PortRef::from(0usize).resolve(&schemas), Some(0));
        assert_eq!(PortRef::from(2usize).resolve(&schemas), None);
        assert_eq!(PortRef::from("out").resolve(&schemas), None);
        assert!(schemas[1].optional);
    }

    #[test]
    fn test_reader_type_mismatch() {
        let mut port = InputPort::new(PortSchema::input::<f32>("in", 0));
        assert_eq!(
            port.reader::<f32>().err(),
            Some(PortError::NotConnected("in".to_string()))
        );

        let (_producer, consumer) = erased_stream_buffer::<f32>(4);
        port.bind(consumer);
        assert!(port.reader::<f32>().is_ok());
        assert_eq!(
            port.reader::<i32>().err(),
            Some(PortError::TypeMismatch {
                port: "in".to_string(),
                actual: "f32",
                requested: "i32",
            })
        );
    }

    #[test]
    fn test_output_close_and_detach() {
        let (pa, ca) = stream_buffer::<u8>(4);
        let (pb, cb) = stream_buffer::<u8>(8);
        let mut port = OutputPort::new(PortSchema::output::<u8>("out", 0));
        assert!(port.all_detached());
        assert_eq!(port.space(), usize::MAX);

        port.attach(Box::new(pa));
        port.attach(Box::new(pb));
        assert!(!port.all_detached());
        assert_eq!(port.space(), 4);
        assert_eq!(port.writer::<u8>().unwrap().num_destinations(), 2);
        assert!(port.writer::<u16>().is_err());

        ca.detach();
        assert_eq!(port.space(), 8);
        cb.detach();
        assert!(port.all_detached());
        assert_eq!(port.space(), 0);

        port.close();
        assert!(ca.is_closed() && cb.is_closed());
    }
}
