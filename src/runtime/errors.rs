//! Error types for the runtime system

use std::time::Duration;

use super::lifecycle::LifecycleState;
use super::message::Command;

/// Error type for dynamic value conversions and property lookups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Key '{0}' not found")]
    KeyNotFound(String),
}

/// Error type for block settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting '{key}' on block '{block}'")]
    UnknownKey { block: String, key: String },

    #[error("Setting '{key}' on block '{block}' cannot be changed at runtime")]
    Immutable { block: String, key: String },

    #[error("Invalid value for setting '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Setting '{key}': {source}")]
    Value {
        key: String,
        #[source]
        source: ValueError,
    },

    #[error("{update}; restoring '{key}' on block '{block}' also failed: {rollback}")]
    RollbackFailed {
        block: String,
        key: String,
        update: Box<SettingsError>,
        rollback: Box<SettingsError>,
    },
}

impl SettingsError {
    /// Wrap a value conversion failure for `key`
    pub fn value(key: impl Into<String>, source: ValueError) -> Self {
        SettingsError::Value {
            key: key.into(),
            source,
        }
    }

    /// Reject `key` with a human readable reason
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        SettingsError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Error type for port operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Port '{0}' not found on block '{1}'")]
    NotFound(String, String),

    #[error("Port index {0} out of range for block '{1}'")]
    IndexOutOfRange(usize, String),

    #[error("Port '{port}' carries {actual}, requested {requested}")]
    TypeMismatch {
        port: String,
        actual: &'static str,
        requested: &'static str,
    },

    #[error("Port '{0}' is not connected")]
    NotConnected(String),
}

/// Error type for stream buffer access
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("Cannot publish {requested} samples, only {space} slots free")]
    InsufficientSpace { requested: usize, space: usize },

    #[error("Cannot publish {requested} tags, only {space} tag slots free")]
    InsufficientTagSpace { requested: usize, space: usize },

    #[error("Cannot consume {requested} samples, only {available} available")]
    InsufficientData { requested: usize, available: usize },
}

/// Error type for connection operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error(
        "Type mismatch: {from_block}.{from_port} ({from_type}) -> {to_block}.{to_port} ({to_type})"
    )]
    TypeMismatch {
        from_block: String,
        from_port: String,
        from_type: &'static str,
        to_block: String,
        to_port: String,
        to_type: &'static str,
    },

    #[error("Block {0} not found")]
    BlockNotFound(String),

    #[error("Port '{port}' not found on block '{block}'")]
    PortNotFound { block: String, port: String },

    #[error("{0}")]
    DuplicateConnection(String),

    #[error("Output port '{port}' on block '{block}' already feeds {limit} inputs")]
    FanOutExceeded {
        block: String,
        port: String,
        limit: usize,
    },

    #[error("Sample type {0} is not registered; call register_type::<T>() first")]
    UnregisteredType(&'static str),
}

/// Error type for block registry lookups
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown block '{type_name}' with parameterization '{parameterization}'")]
    UnknownBlock {
        type_name: String,
        parameterization: String,
    },

    #[error("Block '{type_name}<{parameterization}>' is already registered")]
    DuplicateBlock {
        type_name: String,
        parameterization: String,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Error type for graph construction and validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Input port '{port}' on block '{block}' is not connected")]
    UnconnectedInput { block: String, port: String },
}

/// Error type for work function operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Block-specific error: {0}")]
    BlockError(String),
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;

/// Error type for lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Unknown lifecycle state '{0}'")]
    UnknownState(String),
}

/// Error type carried on the control plane
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("Destination '{0}' not found")]
    DestinationNotFound(String),

    #[error("Property '{property}' not found on '{destination}'")]
    PropertyNotFound {
        destination: String,
        property: String,
    },

    #[error("Command {command} is not supported for property '{property}'")]
    UnsupportedCommand { command: Command, property: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Settings rejected: {0}")]
    SettingsRejected(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("'{destination}' cannot be reached, flowgraph is {state}")]
    NotRunning {
        destination: String,
        state: LifecycleState,
    },

    #[error("Message port disconnected")]
    Disconnected,
}

/// Error type returned by the scheduler's run entry point
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("[{block}] {source}")]
    BlockFailed {
        block: String,
        #[source]
        source: WorkError,
    },

    #[error("No block made progress for {stalled_for:?} while {unfinished} blocks remain unfinished")]
    Stalled {
        stalled_for: Duration,
        unfinished: usize,
    },

    #[error("Worker thread {0} panicked")]
    WorkerPanicked(usize),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Scheduler cannot run from state {0}")]
    InvalidState(LifecycleState),
}
