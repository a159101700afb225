//! Client-side event routing for room-scoped real-time updates.
//!
//! This crate owns the subscriber side of the live update pipeline. Messages
//! arriving on a room's streaming connection are handed to an [`EventRouter`],
//! which decodes them and fans them out to every handler registered for the
//! message's event type.
//!
//! # Architecture
//!
//! - **Instance-owned registry**: an [`EventRouter`] is constructed by the
//!   application and shared by cloning (it is a handle over an `Arc`). There is
//!   no process-wide listener map.
//! - **Explicit registration**: [`EventRouter::subscribe`] returns a
//!   [`Subscription`] whose `unsubscribe` is idempotent and safe to call from
//!   inside the handler itself.
//! - **Presence**: the reserved `presence` event type never reaches generic
//!   subscribers. It updates a shared participant count that can be read
//!   directly or watched.
//! - **Ephemeral**: malformed payloads are dropped, nothing is buffered.
//!
//! This crate has no knowledge of transports or rooms; the `sse` crate feeds it.

use serde_json::Value;

pub mod message;
pub mod router;

pub use message::{InboundMessage, Presence};
pub use router::{EventRouter, Subscription};

/// Trait for handling decoded event payloads.
///
/// Handlers are invoked synchronously on the task that dispatches the message,
/// so they should hand off any long-running work.
pub trait EventHandler: Send + Sync {
    fn handle(&self, payload: &Value);
}

impl<F> EventHandler for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn handle(&self, payload: &Value) {
        self(payload)
    }
}
