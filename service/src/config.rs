use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::time::Duration;

/// Default base URL of the backend exposing `/events/<room-id>`.
pub const DEFAULT_BASE_URL: &str = "http://localhost:4000";

/// Name of the session cookie the backend issues on login.
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "id";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the backend serving the room event streams.
    #[arg(short, long, env, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Session cookie value presented on every stream request.
    #[arg(long, env)]
    session_cookie: Option<String>,

    /// Name of the session cookie.
    #[arg(long, env, default_value = DEFAULT_SESSION_COOKIE_NAME)]
    session_cookie_name: String,

    /// Milliseconds to wait before replacing a failed connection.
    #[arg(long, env, default_value_t = 3000)]
    pub reconnect_delay_ms: u64,

    /// Room to join on startup.
    #[arg(short, long, env)]
    pub room: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the session cookie as `(name, value)`, if one is configured.
    pub fn session_cookie(&self) -> Option<(&str, &str)> {
        self.session_cookie
            .as_deref()
            .map(|value| (self.session_cookie_name.as_str(), value))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
