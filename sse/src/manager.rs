use crate::connection::{Connection, ConnectionState, Generation, RoomId};
use crate::error::Error;
use crate::message::{Command, TransportEvent};
use crate::transport::{room_url, Transport};
use events::EventRouter;
use futures_util::FutureExt;
use log::*;
use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, Sleep};

/// Fixed delay before a failed connection is replaced.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL of the event stream endpoints, e.g. `http://localhost:4000`.
    pub base_url: String,
    pub reconnect_delay: Duration,
}

impl ManagerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

/// Keeps exactly one live connection matching the application's current room.
///
/// All state lives in a single worker task that serializes room changes,
/// transport signals and the reconnect timer. The handle only sends commands,
/// so `set_room` never blocks and is safe to call from inside an event handler.
///
/// Dropping the handle tears the worker down: the open connection is closed and
/// any pending reconnect is cancelled.
///
/// Must be created from within a tokio runtime.
pub struct Manager {
    commands: mpsc::UnboundedSender<Command>,
    router: EventRouter,
    state: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

impl Manager {
    pub fn new<T: Transport>(transport: T, router: EventRouter, config: ManagerConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);

        let worker = Worker::new(transport, router.clone(), config, command_rx, state_tx);
        let worker = tokio::spawn(worker.run());

        Self {
            commands,
            router,
            state,
            worker,
        }
    }

    /// Set the desired room. `None` closes any connection and opens nothing.
    pub fn set_room(&self, room: Option<RoomId>) {
        if self.commands.send(Command::SetRoom(room)).is_err() {
            warn!("Ignoring room change, the connection manager has shut down");
        }
    }

    /// Resolves once every previously issued command has been applied and every
    /// message the current connection already delivered has been routed.
    ///
    /// Routing stops early if a handler changes the room; the change is applied
    /// after this call resolves and the rest of the old stream is discarded.
    pub async fn flush(&self) {
        let (done, applied) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = applied.await;
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn presence_count(&self) -> u64 {
        self.router.presence_count()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// The room the worker currently targets, as of the last applied command.
    pub fn current_room(&self) -> Option<RoomId> {
        self.state.borrow().room().cloned()
    }

    /// Close the connection, cancel any pending reconnect and wait for the
    /// worker to exit.
    pub async fn shutdown(self) -> Result<(), Error> {
        let Self {
            commands, worker, ..
        } = self;

        let _ = commands.send(Command::Shutdown);
        drop(commands);

        worker.await?;
        Ok(())
    }
}

/// A scheduled replacement for the connection of `generation`.
struct ReconnectTimer {
    generation: Generation,
    deadline: Instant,
    sleep: Pin<Box<Sleep>>,
}

impl ReconnectTimer {
    fn new(generation: Generation, delay: Duration) -> Self {
        let deadline = Instant::now() + delay;
        Self {
            generation,
            deadline,
            sleep: Box::pin(sleep_until(deadline)),
        }
    }

    fn is_due(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

struct Worker<T> {
    transport: T,
    router: EventRouter,
    config: ManagerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    desired_room: Option<RoomId>,
    generation: Generation,
    connection: Option<Connection>,
    reconnect: Option<ReconnectTimer>,
}

impl<T: Transport> Worker<T> {
    fn new(
        transport: T,
        router: EventRouter,
        config: ManagerConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            transport,
            router,
            config,
            commands,
            state,
            desired_room: None,
            generation: 0,
            connection: None,
            reconnect: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                // Room changes win over anything the old connection still has queued
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::SetRoom(room)) => self.set_room(room),
                    Some(Command::Flush(done)) => {
                        self.settle();
                        let _ = done.send(());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                generation = reconnect_fired(&mut self.reconnect) => self.reconnect_now(generation),
                (generation, event) = next_transport_event(&mut self.connection) => {
                    self.handle_transport_event(generation, event)
                }
            }
        }

        self.teardown();
    }

    fn set_room(&mut self, room: Option<RoomId>) {
        if room == self.desired_room {
            if let Some(room) = &room {
                debug!("Already targeting room {room}, nothing to do");
            }
            return;
        }

        // Supersede everything belonging to the previous room
        self.reconnect = None;
        self.close_connection();
        self.generation += 1;
        self.router.reset_presence();
        self.desired_room = room.clone();

        match room {
            Some(room) => self.open(room),
            None => {
                info!("Left room, no connection open");
                self.publish_state(ConnectionState::Idle);
            }
        }
    }

    fn open(&mut self, room: RoomId) {
        self.generation += 1;
        let url = room_url(&self.config.base_url, &room);

        info!(
            "Opening connection {} for room {} ({})",
            self.generation, room, url
        );

        let stream = self.transport.connect(&url);
        self.connection = Some(Connection::new(room.clone(), self.generation, stream));
        self.publish_state(ConnectionState::Connecting(room));
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            info!(
                "Closing connection {} for room {}",
                connection.generation(),
                connection.room()
            );
        }
    }

    fn handle_transport_event(&mut self, generation: Generation, event: TransportEvent) {
        if generation != self.generation {
            debug!(
                "Ignoring event from superseded connection {generation} (current {})",
                self.generation
            );
            return;
        }

        match event {
            TransportEvent::Open => self.mark_open(),
            TransportEvent::Message(message) => {
                self.mark_open();
                trace!("Routing {} message", message.event_type);
                self.router.dispatch_message(&message);
            }
            TransportEvent::Error(e) => self.handle_transport_error(e),
        }
    }

    fn mark_open(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        if !connection.is_open() {
            connection.mark_open();
            let room = connection.room().clone();
            info!("Connection {} open for room {room}", connection.generation());
            self.publish_state(ConnectionState::Open(room));
        }
    }

    fn handle_transport_error(&mut self, e: Error) {
        let Some(failed) = self.connection.take() else {
            return;
        };

        let room = failed.room().clone();
        let generation = failed.generation();
        drop(failed);

        warn!(
            "Connection {generation} for room {room} failed: {e}. Reconnecting in {:?}",
            self.config.reconnect_delay
        );

        self.reconnect = Some(ReconnectTimer::new(generation, self.config.reconnect_delay));
        self.publish_state(ConnectionState::Reconnecting(room));
    }

    /// Replace a failed connection. Reads the room desired *now*, never the
    /// room that was current when the failure happened.
    fn reconnect_now(&mut self, generation: Generation) {
        self.reconnect = None;

        if generation != self.generation {
            debug!("Dropping stale reconnect for connection {generation}");
            return;
        }

        match self.desired_room.clone() {
            Some(room) => self.open(room),
            None => debug!("No room desired, skipping reconnect"),
        }
    }

    /// Apply a reconnect that is already due and route everything the current
    /// connection has delivered without waiting.
    fn settle(&mut self) {
        if let Some(timer) = &self.reconnect {
            if timer.is_due() {
                let generation = timer.generation;
                self.reconnect_now(generation);
            }
        }

        // A handler may have queued a room change; the run loop applies it
        // before anything else the old connection delivered
        while self.commands.is_empty() {
            let Some(connection) = self.connection.as_mut() else {
                break;
            };
            let generation = connection.generation();
            match connection.next_event().now_or_never() {
                Some(event) => self.handle_transport_event(generation, event),
                None => break,
            }
        }
    }

    fn teardown(&mut self) {
        self.reconnect = None;
        self.close_connection();
        self.desired_room = None;
        self.publish_state(ConnectionState::Closed);
        info!("Connection manager shut down");
    }

    fn publish_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn next_transport_event(
    connection: &mut Option<Connection>,
) -> (Generation, TransportEvent) {
    match connection {
        Some(connection) => {
            let generation = connection.generation();
            (generation, connection.next_event().await)
        }
        None => pending().await,
    }
}

async fn reconnect_fired(timer: &mut Option<ReconnectTimer>) -> Generation {
    match timer {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.generation
        }
        None => pending().await,
    }
}
