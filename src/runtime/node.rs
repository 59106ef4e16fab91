//! Block trait for streaming processing
//!
//! Defines the `Block` trait that all processing blocks implement.
//! Blocks actively process data when `work()` is called by the scheduler.

use std::any::Any;

pub use super::errors::{SettingsError, WorkError, WorkResult};
pub use super::ports::{InputPort, OutputPort, PortSchema};

use super::value::{PropertyMap, Value};

/// Outcome of a single `work()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Made progress, call again
    Ok,
    /// Not enough data on an input
    InsufficientInput,
    /// Not enough room on an output
    InsufficientOutput,
    /// Inputs are exhausted and no more output will be produced
    EndOfStream,
    /// The block has finished its job
    Done,
}

/// Declared setting of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingDescriptor {
    pub key: String,
    pub description: String,
    /// Can be changed while the flowgraph is running
    pub mutable: bool,
}

impl SettingDescriptor {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            mutable: true,
        }
    }

    /// Only settable at construction time
    pub fn fixed(mut self) -> Self {
        self.mutable = false;
        self
    }
}

/// Upcast helper so `dyn Block` can be downcast to the concrete type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A processing block
/// - Sources have 0 inputs and N outputs
/// - Sinks have N inputs and 0 outputs
/// - Processors have N inputs and M outputs
///
/// Port schemas are read once when the block is added to a graph (and again
/// after construction-time settings are applied), so the port list may
/// depend on settings but not change while running.
pub trait Block: AsAny + Send {
    /// Human readable description for meta information
    fn description(&self) -> &str {
        ""
    }

    /// Get schema for all input ports (name + type + index)
    fn input_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Get schema for all output ports (name + type + index)
    fn output_schema(&self) -> Vec<PortSchema> {
        Vec::new()
    }

    /// Settings this block understands
    fn setting_descriptors(&self) -> Vec<SettingDescriptor> {
        Vec::new()
    }

    /// Current value of every declared setting
    fn settings(&self) -> PropertyMap {
        PropertyMap::new()
    }

    /// Apply one declared setting. Called once per key before `settings_changed`.
    fn set_setting(&mut self, key: &str, _value: &Value) -> Result<(), SettingsError> {
        Err(SettingsError::UnknownKey {
            block: String::new(),
            key: key.to_string(),
        })
    }

    /// Keep unrecognized keys as free-form metadata instead of rejecting them
    fn accepts_unknown_settings(&self) -> bool {
        false
    }

    /// Validate the settings as a whole after a batch of updates
    fn settings_changed(&mut self) -> Result<(), SettingsError> {
        Ok(())
    }

    /// Called once when the flowgraph starts running
    fn start(&mut self) -> WorkResult<()> {
        Ok(())
    }

    /// Called once when the block stops, for whatever reason
    fn stop(&mut self) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    /// Do work: read from inputs, process, write to outputs
    ///
    /// Must not block. Report lack of data or space through [`WorkStatus`].
    fn work(
        &mut self,
        inputs: &mut [InputPort],
        outputs: &mut [OutputPort],
    ) -> WorkResult<WorkStatus>;
}

/// A block type that can be created by the registry
pub trait BlockType: Block + Default {
    /// Registry name, e.g. `flowgraph::Head`
    const TYPE_NAME: &'static str;

    /// Parameterization string, e.g. `f32`. Empty for unparameterized blocks.
    fn parameterization() -> String;
}
