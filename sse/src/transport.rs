use crate::connection::RoomId;
use crate::error::{Error, TransportErrorKind};
use crate::message::TransportEvent;
use async_stream::stream;
use eventsource_client::{self as es, Client};
use events::InboundMessage;
use futures_util::stream::{once, BoxStream, StreamExt};
use log::*;

/// Stream of transport signals for a single connection. Dropping it closes the
/// underlying connection.
pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Opens persistent server-to-client streams.
///
/// Implementations must not reconnect on their own; the manager owns the retry
/// policy so that abandoned rooms are never reopened.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str) -> TransportStream;
}

/// Builds the stream address for a room: `<base-url>/events/<room-id>`.
pub fn room_url(base_url: &str, room: &RoomId) -> String {
    format!(
        "{}/events/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(room.as_str())
    )
}

/// Server-Sent Events transport backed by `eventsource-client`.
///
/// Credentials are ambient to the transport: the session cookie is attached to
/// every request it makes, callers never pass it per connection.
#[derive(Debug, Clone, Default)]
pub struct EventSourceTransport {
    cookie: Option<String>,
}

impl EventSourceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_cookie(name: &str, value: &str) -> Self {
        Self {
            cookie: Some(format!("{name}={value}")),
        }
    }

    fn build_client(&self, url: &str) -> Result<impl Client, Error> {
        let mut builder = es::ClientBuilder::for_url(url).map_err(|e| {
            Error::transport(TransportErrorKind::InvalidUrl).with_cause(e)
        })?;

        if let Some(cookie) = &self.cookie {
            builder = builder.header("Cookie", cookie).map_err(|e| {
                Error::transport(TransportErrorKind::InvalidHeader).with_cause(e)
            })?;
        }

        Ok(builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build())
    }
}

impl Transport for EventSourceTransport {
    fn connect(&self, url: &str) -> TransportStream {
        let client = match self.build_client(url) {
            Ok(client) => client,
            Err(e) => return once(async move { TransportEvent::Error(e) }).boxed(),
        };

        let url = url.to_string();
        stream! {
            let mut stream = client.stream();
            debug!("SSE stream requested for {url}");

            while let Some(item) = stream.next().await {
                match item {
                    Ok(es::SSE::Event(event)) => {
                        yield TransportEvent::Message(InboundMessage::new(event.event_type, event.data));
                    }
                    Ok(_) => {
                        // Ignore comments (keep-alive)
                    }
                    Err(e) => {
                        debug!("SSE stream for {url} failed: {e}");
                        yield TransportEvent::Error(
                            Error::transport(TransportErrorKind::Request).with_cause(e),
                        );
                        return;
                    }
                }
            }

            debug!("SSE stream ended for {url}");
        }
        .boxed()
    }
}
