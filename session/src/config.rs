//! Protocol timing knobs, loaded from environment variables.
//!
//! Every timeout here backs a liveness fallback: heartbeats distinguish
//! absence from silence, the join timeout bounds how long a guest waits for
//! the host, and the catch-up settings bound how long a late joiner waits
//! for a canonical progress snapshot. The reconnect settings bound how long
//! the runtime keeps trying to re-attach after the transport drops.

use std::time::Duration;

use crate::join::AdmissionPolicy;
use crate::types::{Millis, duration_ms};

const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_PRESENCE_STALE_MS: u64 = 30_000;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CATCH_UP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CATCH_UP_ATTEMPTS: u32 = 3;
const DEFAULT_TICK_MS: u64 = 250;
const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 64;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How often a peer refreshes its presence, regardless of activity.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer drops out of effective membership.
    pub stale_after: Duration,
    /// How long a guest waits for the host before admitting itself.
    pub join_timeout: Duration,
    /// How long a late joiner waits before re-sending `ProgressRequest`.
    pub catch_up_timeout: Duration,
    /// Total `ProgressRequest` sends before relying on natural broadcasts.
    pub catch_up_attempts: u32,
    /// Resolution of the runtime timer that drives the fallbacks above.
    pub tick: Duration,
    /// Bounded capacity for the command and event queues.
    pub command_queue_capacity: usize,
    /// Connect attempts after the transport drops; 0 ends the session at once.
    pub reconnect_attempts: u32,
    /// Pause before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Whether the host prompts for each join request.
    pub admission: AdmissionPolicy,
}

impl SessionConfig {
    /// Build the config from environment variables.
    ///
    /// Optional:
    /// - `HEARTBEAT_INTERVAL_MS`: default 10000
    /// - `PRESENCE_STALE_MS`: default 30000 (three missed heartbeats)
    /// - `JOIN_TIMEOUT_MS`: default 5000
    /// - `CATCH_UP_TIMEOUT_MS`: default 5000
    /// - `CATCH_UP_ATTEMPTS`: default 3
    /// - `TICK_MS`: default 250
    /// - `COMMAND_QUEUE_CAPACITY`: default 64
    /// - `RECONNECT_ATTEMPTS`: default 3
    /// - `RECONNECT_DELAY_MS`: default 1000
    /// - `AUTO_APPROVE_JOINS`: `true` to skip the host prompt
    #[must_use]
    pub fn from_env() -> Self {
        let admission = if env_parse("AUTO_APPROVE_JOINS", false) {
            AdmissionPolicy::AutoApprove
        } else {
            AdmissionPolicy::Prompt
        };
        Self {
            heartbeat_interval: Duration::from_millis(env_parse("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS)),
            stale_after: Duration::from_millis(env_parse("PRESENCE_STALE_MS", DEFAULT_PRESENCE_STALE_MS)),
            join_timeout: Duration::from_millis(env_parse("JOIN_TIMEOUT_MS", DEFAULT_JOIN_TIMEOUT_MS)),
            catch_up_timeout: Duration::from_millis(env_parse("CATCH_UP_TIMEOUT_MS", DEFAULT_CATCH_UP_TIMEOUT_MS)),
            catch_up_attempts: env_parse("CATCH_UP_ATTEMPTS", DEFAULT_CATCH_UP_ATTEMPTS).max(1),
            tick: Duration::from_millis(env_parse("TICK_MS", DEFAULT_TICK_MS).max(1)),
            command_queue_capacity: env_parse("COMMAND_QUEUE_CAPACITY", DEFAULT_COMMAND_QUEUE_CAPACITY).max(1),
            reconnect_attempts: env_parse("RECONNECT_ATTEMPTS", DEFAULT_RECONNECT_ATTEMPTS),
            reconnect_delay: Duration::from_millis(env_parse("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)),
            admission,
        }
    }

    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    pub(crate) fn heartbeat_ms(&self) -> Millis {
        duration_ms(self.heartbeat_interval)
    }

    pub(crate) fn stale_ms(&self) -> Millis {
        duration_ms(self.stale_after)
    }

    pub(crate) fn join_timeout_ms(&self) -> Millis {
        duration_ms(self.join_timeout)
    }

    pub(crate) fn catch_up_timeout_ms(&self) -> Millis {
        duration_ms(self.catch_up_timeout)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            stale_after: Duration::from_millis(DEFAULT_PRESENCE_STALE_MS),
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            catch_up_timeout: Duration::from_millis(DEFAULT_CATCH_UP_TIMEOUT_MS),
            catch_up_attempts: DEFAULT_CATCH_UP_ATTEMPTS,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            admission: AdmissionPolicy::Prompt,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
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
