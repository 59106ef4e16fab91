//! Streaming dataflow engine for signal processing graphs
//!
//! Blocks exchange typed samples and sparse, index-addressed tags over
//! bounded single-producer/single-consumer buffers. A [`Scheduler`] drives the
//! graph through its lifecycle and answers control messages while it runs.
//!
//! # Architecture
//!
//! - **Registry**: block types are registered per sample type and created by
//!   name, parameterization and a settings map
//! - **Graph**: owns block instances and type-checked connections
//! - **Scheduler**: single-threaded or worker-pool execution with
//!   end-of-stream propagation, backpressure and a stop/pause control plane
//! - **Blocks**: `NullSource`, `NullSink`, `VectorSource`, `VectorSink`,
//!   `Head`, `Copy` and `TagGate` for every built-in sample type
//!
//! # Example
//!
//! ```no_run
//! use flowgraph::{Graph, Scheduler, property_map};
//!
//! let mut graph = Graph::new();
//! let source = graph.emplace_block("flowgraph::NullSource", "f32", &property_map! {})?;
//! let head = graph.emplace_block(
//!     "flowgraph::Head",
//!     "f32",
//!     &property_map! { "num_items" => 1_000u64 },
//! )?;
//! let sink = graph.emplace_block("flowgraph::NullSink", "f32", &property_map! {})?;
//! graph.connect(source, "out", head, "in")?;
//! graph.connect(head, "out", sink, "in")?;
//!
//! Scheduler::single_threaded(graph).run_and_wait()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod blocks;
pub mod runtime;

// Re-export built-in blocks
pub use blocks::{Head, NullSink, NullSource, TagGate, VectorSink, VectorSource};

// Re-export runtime components
pub use runtime::{
    Block, BlockId, BlockNode, BlockRegistry, BlockType, Command, ConnectionError,
    ExecutionPolicy, Graph, GraphConfig, GraphError, InputPort, LifecycleState, Message,
    MessageError, MsgPortIn, MsgPortOut, OutputPort, PortSchema, PropertyMap, RegistryError,
    Sample, Scheduler, SchedulerConfig, SchedulerError, SettingsError, Tag, Value, WorkError,
    WorkResult, WorkStatus, global_block_registry, register_type,
};
pub use runtime::message::property;
