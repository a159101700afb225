use events::message::{COMMENT, CONNECTED, DICE_ROLL, INITIATIVE_UPDATE};
use events::{EventRouter, Subscription};
use log::*;
use serde_json::Value;
use service::{config::Config, logging::Logger};
use sse::{ConnectionState, EventSourceTransport, Manager, ManagerConfig, RoomId};
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Event types logged by this client as they arrive.
const LOGGED_EVENT_TYPES: [&str; 4] = [CONNECTED, DICE_ROLL, INITIATIVE_UPDATE, COMMENT];

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        std::process::exit(1);
    }

    info!("Streaming room events from [{}]", config.base_url());

    let transport = match config.session_cookie() {
        Some((name, value)) => EventSourceTransport::with_session_cookie(name, value),
        None => {
            warn!("No session cookie configured, stream requests will be unauthenticated");
            EventSourceTransport::new()
        }
    };

    let router = EventRouter::new();
    let subscriptions = subscribe_loggers(&router);
    let manager = Manager::new(transport, router.clone(), manager_config(&config));

    tokio::spawn(log_presence(router.clone()));
    tokio::spawn(log_connection_state(manager.watch_connection_state()));

    if let Some(room) = &config.room {
        manager.set_room(Some(RoomId::from(room.as_str())));
    }

    info!("Type a room id to join it, '-' to leave, ':quit' to exit");

    tokio::select! {
        _ = read_room_commands(&manager) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }

    if let Err(e) = manager.shutdown().await {
        error!("Connection manager did not shut down cleanly: {e}");
        std::process::exit(1);
    }
}

fn manager_config(config: &Config) -> ManagerConfig {
    ManagerConfig::new(config.base_url()).with_reconnect_delay(config.reconnect_delay())
}

fn subscribe_loggers(router: &EventRouter) -> Vec<Subscription> {
    LOGGED_EVENT_TYPES
        .iter()
        .map(|&event_type| {
            router.subscribe_fn(event_type, move |payload: &Value| {
                info!("[{event_type}] {payload}");
            })
        })
        .collect()
}

/// Applies room switches typed on stdin until EOF or `:quit`.
async fn read_room_commands(manager: &Manager) {
    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        };

        match line.trim() {
            "" => continue,
            ":quit" => break,
            "-" => manager.set_room(None),
            room => manager.set_room(Some(RoomId::from(room))),
        }
    }
}

async fn log_presence(router: EventRouter) {
    let mut presence = router.watch_presence();
    while presence.changed().await.is_ok() {
        let count = *presence.borrow_and_update();
        info!("{count} participant(s) in the room");
    }
}

async fn log_connection_state(mut state: tokio::sync::watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        match &*state.borrow_and_update() {
            ConnectionState::Idle => info!("Not in a room"),
            ConnectionState::Connecting(room) => info!("Connecting to room {room}..."),
            ConnectionState::Open(room) => info!("Live updates active for room {room}"),
            ConnectionState::Reconnecting(room) => {
                warn!("Lost connection to room {room}, retrying")
            }
            ConnectionState::Closed => break,
        }
    }
}
