//! Control-plane messages exchanged with a running scheduler
//!
//! Clients push [`Message`]s into the scheduler's inbox ([`MsgPortOut`]
//! returned by `Scheduler::msg_in`) and read replies from its outbox
//! ([`MsgPortIn`] returned by `Scheduler::msg_out`). An empty destination
//! addresses the scheduler itself; otherwise the destination is a block's
//! unique name.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::errors::MessageError;
use super::value::PropertyMap;

/// Well-known property keys
pub mod property {
    /// Scheduler lifecycle state. `Get` reads it, `Set {state}` requests a change.
    pub const LIFECYCLE_STATE: &str = "LifecycleState";
    /// Block settings. `Get` reads them, `Set` applies a partial update.
    pub const SETTINGS: &str = "Settings";
    /// Block type, ports and setting descriptors
    pub const META_INFORMATION: &str = "MetaInformation";
    /// Blocks and connections of the running flowgraph
    pub const GRAPH_INSPECT: &str = "GraphInspect";
    /// Replies with the request payload
    pub const ECHO: &str = "Echo";
    /// Replies with the request payload
    pub const HEARTBEAT: &str = "Heartbeat";
}

/// Message command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Invalid,
    Get,
    Set,
    Partial,
    Final,
    Ready,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Notify,
    Heartbeat,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A control-plane message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: Command,
    /// Block unique name, or empty for the scheduler
    pub destination: String,
    pub service_name: String,
    pub property_key: String,
    pub data: Result<PropertyMap, MessageError>,
    pub client_request_id: String,
}

impl Message {
    pub fn new(
        command: Command,
        destination: impl Into<String>,
        property_key: impl Into<String>,
        payload: PropertyMap,
    ) -> Self {
        Self {
            command,
            destination: destination.into(),
            service_name: String::new(),
            property_key: property_key.into(),
            data: Ok(payload),
            client_request_id: String::new(),
        }
    }

    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = id.into();
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Request payload, or the error carried instead
    pub fn payload(&self) -> Result<&PropertyMap, MessageError> {
        self.data.as_ref().map_err(Clone::clone)
    }

    /// Build the `Final` reply to this request
    pub(crate) fn reply(&self, data: Result<PropertyMap, MessageError>) -> Message {
        Message {
            command: Command::Final,
            destination: self.destination.clone(),
            service_name: self.service_name.clone(),
            property_key: self.property_key.clone(),
            data,
            client_request_id: self.client_request_id.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let destination = if self.destination.is_empty() {
            "<scheduler>"
        } else {
            &self.destination
        };
        write!(f, "{} {} '{}'", self.command, destination, self.property_key)
    }
}

/// Sending end of a message queue
#[derive(Debug, Clone)]
pub struct MsgPortOut {
    tx: Sender<Message>,
}

impl MsgPortOut {
    pub fn send(&self, message: Message) -> Result<(), MessageError> {
        self.tx.send(message).map_err(|_| MessageError::Disconnected)
    }
}

/// Receiving end of a message queue
#[derive(Debug, Clone)]
pub struct MsgPortIn {
    rx: Receiver<Message>,
}

impl MsgPortIn {
    /// Next queued message, without waiting
    pub fn try_recv(&self) -> Result<Option<Message>, MessageError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MessageError::Disconnected),
        }
    }

    /// Wait up to `timeout` for the next message
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, MessageError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(MessageError::Disconnected),
        }
    }

    /// All messages queued right now
    pub fn drain(&self) -> Vec<Message> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create an unbounded message queue
pub fn message_channel() -> (MsgPortOut, MsgPortIn) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (MsgPortOut { tx }, MsgPortIn { rx })
}

/// Build and send a message in one call
pub fn send_message(
    port: &MsgPortOut,
    command: Command,
    destination: &str,
    property_key: &str,
    payload: PropertyMap,
) -> Result<(), MessageError> {
    port.send(Message::new(command, destination, property_key, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property_map;

    #[test]
    fn test_reply_keeps_routing() {
        let request = Message::new(
            Command::Set,
            "flowgraph::Head<f32>#0",
            property::SETTINGS,
            property_map! { "num_items" => 5u64 },
        )
        .with_client_request_id("42");

        let reply = request.reply(Ok(PropertyMap::new()));
        assert_eq!(reply.command, Command::Final);
        assert_eq!(reply.destination, request.destination);
        assert_eq!(reply.property_key, property::SETTINGS);
        assert_eq!(reply.client_request_id, "42");
    }

    #[test]
    fn test_channel_delivery() {
        let (tx, rx) = message_channel();
        assert_eq!(rx.try_recv(), Ok(None));

        send_message(&tx, Command::Get, "", property::LIFECYCLE_STATE, PropertyMap::new())
            .unwrap();
        assert_eq!(rx.len(), 1);
        let message = rx.recv_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(message.command, Command::Get);
        assert_eq!(message.to_string(), "Get <scheduler> 'LifecycleState'");

        drop(tx);
        assert_eq!(rx.try_recv(), Err(MessageError::Disconnected));
    }
}
