//! Server configuration
//!
//! Everything except the port is a fixed default. Tests build their own
//! `ServerConfig` to shrink caps and timeouts.

use std::time::Duration;

use crate::console::Console;

/// Default bind host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Display handle used by the administrator
pub const DEFAULT_HANDLE: &str = "Server";

/// Maximum bytes per message
pub const DEFAULT_MSG_LENGTH: usize = 500;

/// Maximum concurrently serviced connections
pub const DEFAULT_MAX_CLIENTS: usize = 5;

/// Accepted connections allowed to wait for a free slot
pub const DEFAULT_MAX_PENDING: usize = 10;

/// Channel buffer size for registry commands
pub const REGISTRY_CHANNEL_SIZE: usize = 256;

/// Channel buffer size for each member's outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub handle: String,
    pub msg_length: usize,
    pub max_clients: usize,
    pub max_pending: usize,
    /// A connection with no inbound bytes for this long is torn down
    pub idle_timeout: Duration,
    /// Bounded wait for each worker during soft disconnect and shutdown
    pub join_timeout: Duration,
    /// Back-off after a failed admin input read
    pub poll_interval: Duration,
    pub outbound_queue: usize,
    pub registry_queue: usize,
    /// Print the operator console to stdout
    pub console: bool,
}

impl ServerConfig {
    /// Default configuration listening on `port`
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            handle: DEFAULT_HANDLE.to_string(),
            msg_length: DEFAULT_MSG_LENGTH,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_pending: DEFAULT_MAX_PENDING,
            idle_timeout: Duration::from_secs(100),
            join_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            outbound_queue: OUTBOUND_QUEUE_SIZE,
            registry_queue: REGISTRY_CHANNEL_SIZE,
            console: true,
        }
    }

    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn console(&self) -> Console {
        Console::new(self.console)
    }
}
