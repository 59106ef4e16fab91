//! Flowgraph construction: blocks, typed connections and validation
//!
//! Connections are checked when they are made (port existence, matching
//! sample type, single writer per input, fan-out limit) and recorded by
//! type. Buffers are only materialized when a scheduler initialises the
//! graph, so a graph can be rerun with fresh buffers.

use std::any::TypeId;
use std::sync::PoisonError;

use tracing::debug;

use super::block::BlockNode;
use super::errors::{ConnectionError, GraphError};
use super::node::BlockType;
use super::ports::PortRef;
use super::registry::{BlockRegistry, global_block_registry};
use super::type_registry::TYPE_REGISTRY;
use super::value::PropertyMap;

/// Default capacity of a connection buffer, in samples
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default maximum number of inputs one output may feed
pub const DEFAULT_MAX_FAN_OUT: usize = 4;

/// Unique identifier for a block in a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Represents a connection between two blocks
#[derive(Debug, Clone)]
pub struct Connection {
    pub from_block: BlockId,
    pub from_port: usize,
    pub to_block: BlockId,
    pub to_port: usize,
    /// Overrides the graph's default buffer size
    pub buffer_size: Option<usize>,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

/// Graph-wide construction options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    pub default_buffer_size: usize,
    pub max_fan_out: usize,
}

impl GraphConfig {
    pub fn with_default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    pub fn with_max_fan_out(mut self, limit: usize) -> Self {
        self.max_fan_out = limit;
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            max_fan_out: DEFAULT_MAX_FAN_OUT,
        }
    }
}

/// A set of blocks and the typed connections between them
#[derive(Debug, Default)]
pub struct Graph {
    blocks: Vec<BlockNode>,
    connections: Vec<Connection>,
    config: GraphConfig,
}

impl Graph {
    /// Create an empty graph with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Create a block through the process-wide registry and add it
    pub fn emplace_block(
        &mut self,
        type_name: &str,
        parameterization: &str,
        settings: &PropertyMap,
    ) -> Result<BlockId, GraphError> {
        self.emplace_block_from(global_block_registry(), type_name, parameterization, settings)
    }

    /// Create a block through `registry` and add it
    pub fn emplace_block_from(
        &mut self,
        registry: &BlockRegistry,
        type_name: &str,
        parameterization: &str,
        settings: &PropertyMap,
    ) -> Result<BlockId, GraphError> {
        let node = registry.create_block(type_name, parameterization, settings)?;
        Ok(self.insert(node))
    }

    /// Add an already constructed block
    pub fn add_block<B: BlockType>(&mut self, block: B) -> Result<BlockId, GraphError> {
        let node = global_block_registry().wrap_block(block)?;
        Ok(self.insert(node))
    }

    /// Add a block node created elsewhere
    pub fn insert(&mut self, node: BlockNode) -> BlockId {
        let id = BlockId(self.blocks.len());
        debug!("Added block {} as {:?}", node.unique_name(), id);
        self.blocks.push(node);
        id
    }

    /// Connect an output to an input using the default buffer size
    pub fn connect(
        &mut self,
        from: BlockId,
        from_port: impl Into<PortRef>,
        to: BlockId,
        to_port: impl Into<PortRef>,
    ) -> Result<(), ConnectionError> {
        self.add_connection(from, from_port.into(), to, to_port.into(), None)
    }

    /// Connect an output to an input with an explicit buffer size
    pub fn connect_with_buffer(
        &mut self,
        from: BlockId,
        from_port: impl Into<PortRef>,
        to: BlockId,
        to_port: impl Into<PortRef>,
        buffer_size: usize,
    ) -> Result<(), ConnectionError> {
        self.add_connection(from, from_port.into(), to, to_port.into(), Some(buffer_size))
    }

    fn add_connection(
        &mut self,
        from: BlockId,
        from_port: PortRef,
        to: BlockId,
        to_port: PortRef,
        buffer_size: Option<usize>,
    ) -> Result<(), ConnectionError> {
        let from_node = self
            .blocks
            .get(from.0)
            .ok_or_else(|| ConnectionError::BlockNotFound(format!("{from:?}")))?;
        let to_node = self
            .blocks
            .get(to.0)
            .ok_or_else(|| ConnectionError::BlockNotFound(format!("{to:?}")))?;

        let from_index =
            from_node
                .resolve_output(&from_port)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    block: from_node.unique_name().to_string(),
                    port: from_port.to_string(),
                })?;
        let to_index =
            to_node
                .resolve_input(&to_port)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    block: to_node.unique_name().to_string(),
                    port: to_port.to_string(),
                })?;

        let from_schema = from_node.outputs()[from_index].schema();
        let to_schema = to_node.inputs()[to_index].schema();

        if from_schema.type_id != to_schema.type_id {
            return Err(ConnectionError::TypeMismatch {
                from_block: from_node.unique_name().to_string(),
                from_port: from_schema.name.clone(),
                from_type: from_schema.type_name,
                to_block: to_node.unique_name().to_string(),
                to_port: to_schema.name.clone(),
                to_type: to_schema.type_name,
            });
        }

        if let Some(existing) = self
            .connections
            .iter()
            .find(|c| c.to_block == to && c.to_port == to_index)
        {
            let writer = &self.blocks[existing.from_block.0];
            return Err(ConnectionError::DuplicateConnection(format!(
                "Input port '{}' on block '{}' is already connected to '{}' port '{}'",
                to_schema.name,
                to_node.unique_name(),
                writer.unique_name(),
                writer.outputs()[existing.from_port].name()
            )));
        }

        let fan_out = self
            .connections
            .iter()
            .filter(|c| c.from_block == from && c.from_port == from_index)
            .count();
        if fan_out >= self.config.max_fan_out {
            return Err(ConnectionError::FanOutExceeded {
                block: from_node.unique_name().to_string(),
                port: from_schema.name.clone(),
                limit: self.config.max_fan_out,
            });
        }

        let registered = TYPE_REGISTRY
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_registered(from_schema.type_id);
        if !registered {
            return Err(ConnectionError::UnregisteredType(from_schema.type_name));
        }

        debug!(
            "Connected {}.{} -> {}.{} ({})",
            from_node.unique_name(),
            from_schema.name,
            to_node.unique_name(),
            to_schema.name,
            from_schema.type_name
        );

        self.connections.push(Connection {
            from_block: from,
            from_port: from_index,
            to_block: to,
            to_port: to_index,
            buffer_size,
            type_id: from_schema.type_id,
            type_name: from_schema.type_name,
        });

        Ok(())
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockNode> {
        self.blocks.get(id.0)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BlockNode> {
        self.blocks.get_mut(id.0)
    }

    /// Downcast a block to its concrete type
    pub fn block_as<B: BlockType>(&self, id: BlockId) -> Option<&B> {
        self.block(id).and_then(BlockNode::block_as::<B>)
    }

    /// Find a block by its unique name
    pub fn find_block(&self, unique_name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.unique_name() == unique_name)
            .map(BlockId)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BlockNode)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId(i), b))
    }

    /// Get all connections in the graph
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Get the number of blocks
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Validate the graph: every required input port must be connected
    ///
    /// Output ports don't need to be connected; unconnected outputs discard.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (id, node) in self.blocks() {
            for (index, input) in node.inputs().iter().enumerate() {
                if input.schema().optional {
                    continue;
                }
                let connected = self
                    .connections
                    .iter()
                    .any(|c| c.to_block == id && c.to_port == index);
                if !connected {
                    return Err(GraphError::UnconnectedInput {
                        block: node.unique_name().to_string(),
                        port: input.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Create fresh buffers for every connection and bind them to the ports
    pub(crate) fn bind_buffers(&mut self) -> Result<(), GraphError> {
        for node in &mut self.blocks {
            node.unbind_ports();
        }

        let registry = TYPE_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
        for conn in &self.connections {
            let capacity = conn.buffer_size.unwrap_or(self.config.default_buffer_size);
            let (producer, consumer) = registry
                .create_buffer(conn.type_id, capacity)
                .ok_or(ConnectionError::UnregisteredType(conn.type_name))?;
            self.blocks[conn.from_block.0].outputs_mut()[conn.from_port].attach(producer);
            self.blocks[conn.to_block.0].inputs_mut()[conn.to_port].bind(consumer);
        }
        Ok(())
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [BlockNode] {
        &mut self.blocks
    }

    /// Snapshot of blocks and connections for `GraphInspect`
    pub fn inspect(&self) -> PropertyMap {
        let blocks: PropertyMap = self
            .blocks
            .iter()
            .map(|b| {
                (
                    b.unique_name().to_string(),
                    crate::Value::Map(crate::property_map! {
                        "name" => b.name(),
                        "typeName" => b.type_name(),
                        "state" => b.state().as_str(),
                    }),
                )
            })
            .collect();
        let connections = crate::Value::vector(self.connections.iter().map(|c| {
            let from = &self.blocks[c.from_block.0];
            let to = &self.blocks[c.to_block.0];
            format!(
                "{}.{} -> {}.{}",
                from.unique_name(),
                from.outputs()[c.from_port].name(),
                to.unique_name(),
                to.inputs()[c.to_port].name()
            )
        }));

        crate::property_map! {
            "blocks" => blocks,
            "connections" => connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Copy, Head, NullSink, NullSource, VectorSink};

    #[test]
    fn test_basic_graph_building() {
        let mut graph = Graph::new();
        let source = graph.add_block(NullSource::<u32>::default()).unwrap();
        let sink = graph.add_block(NullSink::<u32>::default()).unwrap();

        assert!(graph.connect(source, "out", sink, "in").is_ok());
        assert!(graph.validate().is_ok());
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_type_mismatch() {
        let mut graph = Graph::new();
        let source = graph.add_block(NullSource::<u32>::default()).unwrap();
        let sink = graph.add_block(NullSink::<u64>::default()).unwrap();

        let err = graph.connect(source, 0usize, sink, 0usize).unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::TypeMismatch {
                from_type: "u32",
                to_type: "u64",
                ..
            }
        ));
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_invalid_port() {
        let mut graph = Graph::new();
        let source = graph.add_block(NullSource::<u32>::default()).unwrap();
        let sink = graph.add_block(NullSink::<u32>::default()).unwrap();

        assert!(matches!(
            graph.connect(source, 1usize, sink, 0usize),
            Err(ConnectionError::PortNotFound { .. })
        ));
        assert!(matches!(
            graph.connect(source, "out", sink, "input"),
            Err(ConnectionError::PortNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_input_connection() {
        let mut graph = Graph::new();
        let a = graph.add_block(NullSource::<f32>::default()).unwrap();
        let b = graph.add_block(NullSource::<f32>::default()).unwrap();
        let sink = graph.add_block(NullSink::<f32>::default()).unwrap();

        graph.connect(a, "out", sink, "in").unwrap();
        let err = graph.connect(b, "out", sink, "in").unwrap_err();
        assert!(matches!(err, ConnectionError::DuplicateConnection(_)));
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_fan_out_limit() {
        let mut graph = Graph::with_config(GraphConfig::default().with_max_fan_out(2));
        let source = graph.add_block(NullSource::<f32>::default()).unwrap();
        let sinks: Vec<_> = (0..3)
            .map(|_| graph.add_block(NullSink::<f32>::default()).unwrap())
            .collect();

        graph.connect(source, "out", sinks[0], "in").unwrap();
        graph.connect(source, "out", sinks[1], "in").unwrap();
        assert!(matches!(
            graph.connect(source, "out", sinks[2], "in"),
            Err(ConnectionError::FanOutExceeded { limit: 2, .. })
        ));
    }

    #[test]
    fn test_unconnected_input() {
        let mut graph = Graph::new();
        let source = graph.add_block(NullSource::<i16>::default()).unwrap();
        let copy = graph.add_block(Copy::<i16>::default()).unwrap();
        let _sink = graph.add_block(VectorSink::<i16>::default()).unwrap();
        graph.connect(source, "out", copy, "in").unwrap();

        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnconnectedInput { .. })
        ));
    }

    #[test]
    fn test_emplace_and_find() {
        let mut graph = Graph::new();
        let head = graph
            .emplace_block(
                "flowgraph::Head",
                "f64",
                &crate::property_map! { "num_items" => 7u64 },
            )
            .unwrap();
        let name = graph.block(head).unwrap().unique_name().to_string();
        assert_eq!(graph.find_block(&name), Some(head));
        assert_eq!(graph.block_as::<Head<f64>>(head).unwrap().num_items(), 7);
        assert!(graph.block_as::<Head<f32>>(head).is_none());
    }

    #[test]
    fn test_bind_buffers_uses_configured_size() {
        let mut graph = Graph::new();
        let source = graph.add_block(NullSource::<u8>::default()).unwrap();
        let sink = graph.add_block(NullSink::<u8>::default()).unwrap();
        graph.connect_with_buffer(source, "out", sink, "in", 16).unwrap();
        graph.bind_buffers().unwrap();

        assert_eq!(graph.block(source).unwrap().outputs()[0].space(), 16);
        assert!(graph.block(sink).unwrap().inputs()[0].is_connected());
    }
}
