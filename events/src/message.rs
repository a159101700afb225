use serde::Deserialize;

// Event types emitted by the room event stream
pub const CONNECTED: &str = "connected";
pub const DICE_ROLL: &str = "dice_roll";
pub const INITIATIVE_UPDATE: &str = "initiative_update";
pub const COMMENT: &str = "comment";

/// Reserved event type carrying the live participant count for the room.
/// Never routed to generic subscribers.
pub const PRESENCE: &str = "presence";

/// A single named message as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub event_type: String,
    pub data: String,
}

impl InboundMessage {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

/// Payload of a `presence` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Presence {
    pub count: u64,
}
