//! Runtime support for streaming block graphs

pub mod block;
pub mod buffer;
pub mod errors;
pub mod graph;
pub mod lifecycle;
pub mod message;
pub mod node;
pub mod ports;
pub mod receiver;
pub mod registry;
pub mod sample;
pub mod scheduler;
pub mod sender;
pub mod tag;
pub mod type_registry;
pub mod value;
pub mod watchdog;
mod worker;

pub use block::BlockNode;
pub use buffer::{ErasedConsumer, ErasedProducer, ReadChunk, StreamConsumer, StreamProducer, stream_buffer};
pub use errors::{
    BufferError, ConnectionError, GraphError, LifecycleError, MessageError, PortError,
    RegistryError, SchedulerError, SettingsError, ValueError, WorkError, WorkResult,
};
pub use graph::{BlockId, Connection, Graph, GraphConfig};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use message::{Command, Message, MsgPortIn, MsgPortOut, message_channel, send_message};
pub use node::{Block, BlockType, SettingDescriptor, WorkStatus};
pub use ports::{InputPort, OutputPort, PortDirection, PortRef, PortSchema};
pub use receiver::StreamReader;
pub use registry::{BlockRegistry, global_block_registry};
pub use sample::Sample;
pub use scheduler::{ExecutionPolicy, Scheduler, SchedulerConfig};
pub use sender::StreamWriter;
pub use tag::Tag;
pub use type_registry::{register_type, registered_type_names};
pub use value::{PropertyMap, Value};
pub use watchdog::Watchdog;
