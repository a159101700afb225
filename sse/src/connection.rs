use crate::error::Error;
use crate::message::TransportEvent;
use crate::transport::TransportStream;
use futures_util::StreamExt;
use log::*;
use std::fmt;

/// Identifies one real-time channel, e.g. a scheduled session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Distinguishes a connection from every connection that superseded it.
pub type Generation = u64;

/// Lifecycle of the manager's connection, published for UI indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No room is active.
    Idle,
    Connecting(RoomId),
    Open(RoomId),
    /// The last connection failed; a replacement is scheduled.
    Reconnecting(RoomId),
    /// The manager was torn down.
    Closed,
}

impl ConnectionState {
    pub fn room(&self) -> Option<&RoomId> {
        match self {
            ConnectionState::Connecting(room)
            | ConnectionState::Open(room)
            | ConnectionState::Reconnecting(room) => Some(room),
            ConnectionState::Idle | ConnectionState::Closed => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open(_))
    }
}

/// A single live stream scoped to one room. Dropping it closes the stream.
pub(crate) struct Connection {
    room: RoomId,
    generation: Generation,
    stream: TransportStream,
    open: bool,
}

impl Connection {
    pub(crate) fn new(room: RoomId, generation: Generation, stream: TransportStream) -> Self {
        Self {
            room,
            generation,
            stream,
            open: false,
        }
    }

    pub(crate) fn room(&self) -> &RoomId {
        &self.room
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    /// Next signal from the transport. A stream that simply ends is reported
    /// as an error so it goes through the reconnect policy.
    pub(crate) async fn next_event(&mut self) -> TransportEvent {
        match self.stream.next().await {
            Some(event) => event,
            None => TransportEvent::Error(Error::stream_ended()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        trace!(
            "Dropped stream of connection {} for room {}",
            self.generation, self.room
        );
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("room", &self.room)
            .field("generation", &self.generation)
            .field("open", &self.open)
            .finish()
    }
}
