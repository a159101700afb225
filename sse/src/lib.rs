//! Client-side Server-Sent Events connection management for room-scoped updates.
//!
//! This crate keeps a single streaming connection open for the room the
//! application is currently showing, and feeds everything that arrives on it
//! into an [`events::EventRouter`].
//!
//! # Architecture
//!
//! - **One connection per active room**: [`Manager::set_room`] is the only input.
//!   Switching rooms closes the old stream before the new one is opened; `None`
//!   closes it and opens nothing.
//! - **Single worker task**: room changes, transport signals and the reconnect
//!   timer are serialized through one `tokio::select!` loop, so there is never a
//!   moment where two connections are live.
//! - **Generations**: every connection is tagged with a generation. Events from a
//!   superseded generation are discarded before they reach the router.
//! - **Explicit reconnect**: on a transport error or a stream that ends, the
//!   connection is dropped and replaced after a fixed delay (3 seconds by
//!   default, unbounded attempts). The retry reads the room desired at fire time,
//!   so a room the application has left is never reopened.
//! - **Ambient credentials**: the [`Transport`] carries the session cookie; the
//!   manager never handles credentials.
//!
//! # Example
//!
//! ```rust,ignore
//! use events::{message::DICE_ROLL, EventRouter};
//! use sse::{EventSourceTransport, Manager, ManagerConfig, RoomId};
//!
//! let router = EventRouter::new();
//! let manager = Manager::new(
//!     EventSourceTransport::with_session_cookie("id", &session_cookie),
//!     router.clone(),
//!     ManagerConfig::new("http://localhost:4000"),
//! );
//!
//! let rolls = router.subscribe_fn(DICE_ROLL, |roll| println!("rolled {roll}"));
//! manager.set_room(Some(RoomId::from("session-42")));
//! // ...
//! rolls.unsubscribe();
//! manager.shutdown().await?;
//! ```
//!
//! # Modules
//!
//! - `connection`: `RoomId`, generations, `ConnectionState` and the live connection
//! - `manager`: the `Manager` handle and its worker loop
//! - `message`: transport signals and worker commands
//! - `transport`: the `Transport` seam and the eventsource-backed implementation

pub mod connection;
pub mod error;
pub mod manager;
pub mod message;
pub mod transport;

pub use connection::{ConnectionState, Generation, RoomId};
pub use manager::{Manager, ManagerConfig, DEFAULT_RECONNECT_DELAY};
pub use message::TransportEvent;
pub use transport::{EventSourceTransport, Transport, TransportStream};
