//! Relay configuration, loaded from environment variables.

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CLIENT_QUEUE: usize = 256;
const DEFAULT_MAX_PEERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    /// Bounded outbound queue per connection. A full queue drops frames.
    pub client_queue: usize,
    /// Connections allowed per session code.
    pub max_peers: usize,
}

impl RelayConfig {
    /// Build the config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `RELAY_CLIENT_QUEUE`: default 256
    /// - `RELAY_MAX_PEERS`: default 8
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            client_queue: env_parse("RELAY_CLIENT_QUEUE", DEFAULT_CLIENT_QUEUE).max(1),
            max_peers: env_parse("RELAY_MAX_PEERS", DEFAULT_MAX_PEERS).max(2),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT, client_queue: DEFAULT_CLIENT_QUEUE, max_peers: DEFAULT_MAX_PEERS }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
