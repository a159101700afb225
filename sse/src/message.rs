use crate::connection::RoomId;
use crate::error::Error;
use events::InboundMessage;
use tokio::sync::oneshot;

/// Signals produced by a streaming transport for one connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport reports the stream as established.
    Open,
    /// A named message arrived.
    Message(InboundMessage),
    /// The connection failed. Nothing more is read from this stream.
    Error(Error),
}

/// Commands sent from a `Manager` handle to its worker.
#[derive(Debug)]
pub(crate) enum Command {
    SetRoom(Option<RoomId>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}
