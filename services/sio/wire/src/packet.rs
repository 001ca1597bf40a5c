//! socket.io packet model.

use crate::protocol::{PacketType, DEFAULT_NSP};
use serde_json::Value;

/// Acknowledgement request identifier
pub type AckId = i64;

/// A decoded socket.io packet
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet type
    pub kind: PacketType,
    /// Namespace
    pub nsp: String,
    /// Acknowledgement ID, if the sender expects (or this is) a reply
    pub id: Option<AckId>,
    /// JSON payload
    pub data: Option<Value>,
}

impl Packet {
    /// Create a packet on the default namespace
    pub fn new(kind: PacketType, data: Option<Value>) -> Self {
        Self {
            kind,
            nsp: DEFAULT_NSP.to_string(),
            id: None,
            data,
        }
    }

    /// Namespace connect request
    pub fn connect() -> Self {
        Self::new(PacketType::Connect, None)
    }

    /// Event packet: `[method, ...args]`
    pub fn event(method: &str, args: Vec<Value>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Value::String(method.to_string()));
        items.extend(args);
        Self::new(PacketType::Event, Some(Value::Array(items)))
    }

    /// Acknowledgement reply to the event with ID `id`
    pub fn ack(id: AckId, args: Vec<Value>) -> Self {
        Self::new(PacketType::Ack, Some(Value::Array(args))).with_id(id)
    }

    /// Attach an acknowledgement ID
    pub fn with_id(mut self, id: AckId) -> Self {
        self.id = Some(id);
        self
    }

    /// Event name for event packets
    pub fn event_name(&self) -> Option<&str> {
        match self.kind {
            PacketType::Event | PacketType::BinaryEvent => match &self.data {
                Some(Value::Array(items)) => items.first().and_then(Value::as_str),
                _ => None,
            },
            _ => None,
        }
    }

    /// Arguments carried by the packet. For events the leading method name is
    /// stripped; a non-array payload becomes a single argument.
    pub fn args(&self) -> Vec<Value> {
        match &self.data {
            Some(Value::Array(items)) => {
                if self.event_name().is_some() {
                    items[1..].to_vec()
                } else {
                    items.clone()
                }
            }
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        }
    }

    /// Whether the packet belongs to the default namespace
    pub fn is_default_nsp(&self) -> bool {
        self.nsp.is_empty() || self.nsp == DEFAULT_NSP
    }
}
