//! Runtime wrapper around a block
//!
//! A [`BlockNode`] owns a boxed [`Block`] together with its identity (name,
//! type name, unique name), its bound ports, free-form settings and its own
//! lifecycle state. The scheduler drives blocks exclusively through
//! [`BlockNode::invoke`], which also implements end-of-stream propagation:
//!
//! - a block reporting `InsufficientInput` while one of its inputs is
//!   exhausted is finished
//! - a block whose outputs have all been detached by their readers is
//!   finished
//! - finishing closes every output and detaches every input, so the
//!   condition travels downstream and upstream respectively

use std::fmt;

use tracing::{debug, error, info};

use super::errors::{MessageError, SettingsError, WorkError, WorkResult};
use super::lifecycle::LifecycleState;
use super::message::{Command, Message, property};
use super::node::{AsAny, Block, WorkStatus};
use super::ports::{InputPort, OutputPort, PortRef, PortSchema};
use super::value::{PropertyMap, Value};
use super::watchdog::{OperationGuard, WatchdogHandle};

/// What a single invocation achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    Progress,
    Idle,
    /// The block finished during this invocation
    Finished,
}

/// Why a block stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishReason {
    Done,
    EndOfStream,
    Detached,
    StopRequested,
    Failed,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            FinishReason::Done => "done",
            FinishReason::EndOfStream => "end of stream",
            FinishReason::Detached => "all readers detached",
            FinishReason::StopRequested => "stop requested",
            FinishReason::Failed => "work failed",
        };
        f.write_str(text)
    }
}

/// A block instance inside a graph
pub struct BlockNode {
    name: String,
    type_name: String,
    block_type: String,
    parameterization: String,
    unique_name: String,
    block: Box<dyn Block>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    extra_settings: PropertyMap,
    state: LifecycleState,
    work_calls: u64,
    watchdog: Option<WatchdogHandle>,
}

impl BlockNode {
    /// Wrap a block created for `block_type` with `parameterization`
    ///
    /// The unique name is `<type_name>#<sequence>`.
    pub(crate) fn new(
        block_type: &str,
        parameterization: &str,
        block: Box<dyn Block>,
        sequence: u64,
    ) -> Self {
        let type_name = instantiated_type_name(block_type, parameterization);
        let unique_name = format!("{type_name}#{sequence}");
        let mut node = Self {
            name: type_name.clone(),
            type_name,
            block_type: block_type.to_string(),
            parameterization: parameterization.to_string(),
            unique_name,
            block,
            inputs: Vec::new(),
            outputs: Vec::new(),
            extra_settings: PropertyMap::new(),
            state: LifecycleState::Idle,
            work_calls: 0,
            watchdog: None,
        };
        node.refresh_ports();
        node
    }

    fn refresh_ports(&mut self) {
        self.inputs = self
            .block
            .input_schema()
            .into_iter()
            .map(InputPort::new)
            .collect();
        self.outputs = self
            .block
            .output_schema()
            .into_iter()
            .map(OutputPort::new)
            .collect();
    }

    /// Display name. Defaults to the instantiated type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Instantiated type name, e.g. `flowgraph::Head<f32>`
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Registry type name, e.g. `flowgraph::Head`
    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn parameterization(&self) -> &str {
        &self.parameterization
    }

    /// Process-unique name, e.g. `flowgraph::Head<f32>#0`
    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn work_calls(&self) -> u64 {
        self.work_calls
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn block(&self) -> &dyn Block {
        self.block.as_ref()
    }

    /// Downcast the wrapped block to its concrete type
    pub fn block_as<B: Block>(&self) -> Option<&B> {
        <dyn Block as AsAny>::as_any(self.block.as_ref()).downcast_ref::<B>()
    }

    pub fn block_as_mut<B: Block>(&mut self) -> Option<&mut B> {
        <dyn Block as AsAny>::as_any_mut(self.block.as_mut()).downcast_mut::<B>()
    }

    pub(crate) fn input_schemas(&self) -> Vec<PortSchema> {
        self.inputs.iter().map(|p| p.schema().clone()).collect()
    }

    pub(crate) fn output_schemas(&self) -> Vec<PortSchema> {
        self.outputs.iter().map(|p| p.schema().clone()).collect()
    }

    pub(crate) fn resolve_input(&self, port: &PortRef) -> Option<usize> {
        port.resolve(&self.input_schemas())
    }

    pub(crate) fn resolve_output(&self, port: &PortRef) -> Option<usize> {
        port.resolve(&self.output_schemas())
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut [InputPort] {
        &mut self.inputs
    }

    pub(crate) fn outputs_mut(&mut self) -> &mut [OutputPort] {
        &mut self.outputs
    }

    // ────────────────────────────────────────────────────────────────────
    // Settings
    // ────────────────────────────────────────────────────────────────────

    /// Declared settings merged with any free-form extras
    pub fn settings(&self) -> PropertyMap {
        let mut settings = self.extra_settings.clone();
        settings.extend(self.block.settings());
        settings
    }

    /// Apply a partial settings update while the block may be running
    ///
    /// Keys marked fixed are rejected. Either every key is applied or none.
    pub fn apply_settings(&mut self, settings: &PropertyMap) -> Result<(), SettingsError> {
        self.apply(settings, true)
    }

    /// Apply construction-time settings. Ports are re-read afterwards.
    pub(crate) fn apply_initial_settings(
        &mut self,
        settings: &PropertyMap,
    ) -> Result<(), SettingsError> {
        self.apply(settings, false)?;
        self.refresh_ports();
        Ok(())
    }

    fn apply(&mut self, settings: &PropertyMap, running: bool) -> Result<(), SettingsError> {
        let descriptors = self.block.setting_descriptors();
        let permissive = self.block.accepts_unknown_settings();

        for key in settings.keys() {
            match descriptors.iter().find(|d| &d.key == key) {
                Some(d) if running && !d.mutable => {
                    return Err(SettingsError::Immutable {
                        block: self.unique_name.clone(),
                        key: key.clone(),
                    });
                }
                Some(_) => {}
                None if permissive => {}
                None => {
                    return Err(SettingsError::UnknownKey {
                        block: self.unique_name.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        let declared: Vec<&str> = descriptors.iter().map(|d| d.key.as_str()).collect();
        let previous = self.block.settings();
        match self.apply_checked(settings, &declared) {
            Ok(()) => Ok(()),
            Err(update) => match self.restore(&previous) {
                Ok(()) => Err(update),
                Err((key, rollback)) => Err(SettingsError::RollbackFailed {
                    block: self.unique_name.clone(),
                    key,
                    update: Box::new(update),
                    rollback: Box::new(rollback),
                }),
            },
        }
    }

    /// Put back the last accepted values, reporting the first key that failed
    fn restore(&mut self, previous: &PropertyMap) -> Result<(), (String, SettingsError)> {
        let mut failure = None;
        for (key, value) in previous {
            if let Err(e) = self.block.set_setting(key, value) {
                error!("[{}] Failed to restore setting '{}': {}", self.unique_name, key, e);
                if failure.is_none() {
                    failure = Some((key.clone(), e));
                }
            }
        }
        if let Err(e) = self.block.settings_changed() {
            error!("[{}] Settings rejected after restore: {}", self.unique_name, e);
            if failure.is_none() {
                failure = Some((String::from("*"), e));
            }
        }
        failure.map_or(Ok(()), Err)
    }

    fn apply_checked(
        &mut self,
        settings: &PropertyMap,
        declared: &[&str],
    ) -> Result<(), SettingsError> {
        let mut extras = Vec::new();
        for (key, value) in settings {
            if declared.contains(&key.as_str()) {
                self.block.set_setting(key, value)?;
            } else {
                extras.push((key.clone(), value.clone()));
            }
        }
        self.block.settings_changed()?;
        if !settings.is_empty() {
            debug!("[{}] settings updated: {:?}", self.unique_name, settings.keys());
        }
        self.extra_settings.extend(extras);
        Ok(())
    }

    /// Type, ports and settings description
    pub fn meta_information(&self) -> PropertyMap {
        let ports = |schemas: Vec<PortSchema>| {
            Value::Vector(
                schemas
                    .into_iter()
                    .map(|s| {
                        Value::Map(crate::property_map! {
                            "name" => s.name,
                            "type" => s.type_name,
                            "index" => s.index as u64,
                            "optional" => s.optional,
                        })
                    })
                    .collect(),
            )
        };
        let settings = Value::Vector(
            self.block
                .setting_descriptors()
                .into_iter()
                .map(|d| {
                    Value::Map(crate::property_map! {
                        "key" => d.key,
                        "description" => d.description,
                        "mutable" => d.mutable,
                    })
                })
                .collect(),
        );

        crate::property_map! {
            "name" => self.name.as_str(),
            "uniqueName" => self.unique_name.as_str(),
            "typeName" => self.type_name.as_str(),
            "blockType" => self.block_type.as_str(),
            "parameterization" => self.parameterization.as_str(),
            "description" => self.block.description(),
            "inputs" => ports(self.input_schemas()),
            "outputs" => ports(self.output_schemas()),
            "settings" => settings,
        }
    }

    /// Answer a control message addressed to this block
    pub(crate) fn handle_message(&mut self, message: &Message) -> Result<PropertyMap, MessageError> {
        let key = message.property_key.as_str();
        match (key, message.command) {
            (property::SETTINGS, Command::Get) => Ok(self.settings()),
            (property::SETTINGS, Command::Set) => {
                self.apply_settings(message.payload()?)
                    .map_err(|e| MessageError::SettingsRejected(e.to_string()))?;
                Ok(self.settings())
            }
            (property::META_INFORMATION, Command::Get) => Ok(self.meta_information()),
            (property::LIFECYCLE_STATE, Command::Get) => {
                Ok(crate::property_map! { "state" => self.state.as_str() })
            }
            (property::ECHO | property::HEARTBEAT, _) => Ok(message.payload()?.clone()),
            (property::SETTINGS | property::META_INFORMATION | property::LIFECYCLE_STATE, command) => {
                Err(MessageError::UnsupportedCommand {
                    command,
                    property: key.to_string(),
                })
            }
            _ => Err(MessageError::PropertyNotFound {
                destination: self.unique_name.clone(),
                property: key.to_string(),
            }),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Execution
    // ────────────────────────────────────────────────────────────────────

    pub(crate) fn unbind_ports(&mut self) {
        for input in &mut self.inputs {
            input.unbind();
        }
        for output in &mut self.outputs {
            output.unbind();
        }
    }

    pub(crate) fn set_watchdog(&mut self, handle: Option<WatchdogHandle>) {
        self.watchdog = handle;
    }

    /// Reset runtime state and call the block's start hook
    pub(crate) fn start(&mut self) -> WorkResult<()> {
        self.state = LifecycleState::Idle;
        self.work_calls = 0;
        if let Err(e) = self.block.start() {
            self.state = LifecycleState::Error;
            return Err(e);
        }
        self.state = LifecycleState::Running;
        debug!("[{}] started", self.unique_name);
        Ok(())
    }

    /// Run one `work()` call and apply end-of-stream rules
    pub(crate) fn invoke(&mut self) -> Result<Invocation, WorkError> {
        if self.state != LifecycleState::Running {
            return Ok(Invocation::Idle);
        }
        if !self.outputs.is_empty() && self.outputs.iter().all(OutputPort::all_detached) {
            self.finish(FinishReason::Detached);
            return Ok(Invocation::Finished);
        }

        let status = {
            let _guard = self.watchdog.as_ref().map(OperationGuard::new);
            self.block.work(&mut self.inputs, &mut self.outputs)
        };
        self.work_calls += 1;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.finish(FinishReason::Failed);
                self.state = LifecycleState::Error;
                return Err(e);
            }
        };

        match status {
            WorkStatus::Ok => Ok(Invocation::Progress),
            WorkStatus::InsufficientInput if self.inputs.iter().any(InputPort::is_exhausted) => {
                self.finish(FinishReason::EndOfStream);
                Ok(Invocation::Finished)
            }
            WorkStatus::InsufficientInput | WorkStatus::InsufficientOutput => Ok(Invocation::Idle),
            WorkStatus::EndOfStream => {
                self.finish(FinishReason::EndOfStream);
                Ok(Invocation::Finished)
            }
            WorkStatus::Done => {
                self.finish(FinishReason::Done);
                Ok(Invocation::Finished)
            }
        }
    }

    /// Stop the block, propagating end of stream to its neighbours
    pub(crate) fn finish(&mut self, reason: FinishReason) {
        if self.is_finished() {
            return;
        }
        for output in &self.outputs {
            output.close();
        }
        for input in &self.inputs {
            input.detach();
        }
        self.block.stop();
        self.state = LifecycleState::Stopped;
        info!(
            "[{}] Finished ({}) after {} work calls",
            self.unique_name, reason, self.work_calls
        );
    }

    pub(crate) fn pause(&mut self) {
        if self.state == LifecycleState::Running {
            self.block.pause();
            self.state = LifecycleState::Paused;
        }
    }

    pub(crate) fn resume(&mut self) {
        if self.state == LifecycleState::Paused {
            self.block.resume();
            self.state = LifecycleState::Running;
        }
    }
}

impl fmt::Debug for BlockNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BlockNode")
            .field("unique_name", &self.unique_name)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

/// `flowgraph::Head` + `f32` -> `flowgraph::Head<f32>`
pub(crate) fn instantiated_type_name(block_type: &str, parameterization: &str) -> String {
    if parameterization.is_empty() {
        block_type.to_string()
    } else {
        format!("{block_type}<{parameterization}>")
    }
}
