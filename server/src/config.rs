//! Runtime configuration for the session server.
//!
//! The binary builds this from command-line arguments; tests build it
//! directly and shrink the intervals.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use shared::DEFAULT_TICK_RATE;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind_addr: SocketAddr,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Prefix of every persistence key, e.g. the hosting region.
    pub location: String,
    /// How often the termination flag is read from the store.
    pub termination_poll_interval: Duration,
    /// With no clients connected, the listener is recreated this often.
    pub listener_refresh_interval: Duration,
    /// The process recycles itself after this much uptime.
    pub max_uptime: Duration,
    /// Keep connections whose ticket fails validation (local testing only).
    pub skip_ticket_validation: bool,
    /// Spawn players whose input arrives before their `Spawn` instead of
    /// disconnecting them.
    pub lenient_input_recovery: bool,
    /// Upper bound on waiting for in-flight position writes at shutdown.
    pub shutdown_flush_timeout: Duration,
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Fixed simulation step in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 1935)),
            tick_rate: DEFAULT_TICK_RATE,
            location: "local".to_string(),
            termination_poll_interval: Duration::from_secs(5),
            listener_refresh_interval: Duration::from_secs(600),
            max_uptime: Duration::from_secs(24 * 60 * 60),
            skip_ticket_validation: false,
            lenient_input_recovery: true,
            shutdown_flush_timeout: Duration::from_secs(3),
        }
    }
}
