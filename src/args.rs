// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::level_filters::LevelFilter;

use crate::publisher::RetryPolicy;

/// Base address of the OD4 multicast range; the conference id selects the
/// final octet.
const GROUP_BASE: [u8; 3] = [225, 0, 0];

/// UDP port shared by all OD4 conferences.
const GROUP_PORT: u16 = 12175;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// OD4 conference id.  Selects the multicast group 225.0.0.CID:12175.
    #[arg(long, env = "CLUON_CID", default_value = "111")]
    pub cid: u8,

    /// Network interface address for the multicast join; 0.0.0.0 lets the
    /// OS pick.
    #[arg(long, env = "CLUON_INTERFACE", default_value = "0.0.0.0")]
    pub interface: Ipv4Addr,

    /// Bus datagrams making up one full sensor revolution.
    #[arg(long, env = "CLUON_ENVELOPES_PER_REVOLUTION", default_value = "2")]
    pub envelopes_per_revolution: usize,

    /// MQTT broker hostname or IP address.
    #[arg(long, env = "MQTT_BROKER_HOST")]
    pub mqtt_broker_host: String,

    /// MQTT broker port.
    #[arg(long, env = "MQTT_BROKER_PORT", default_value = "1883")]
    pub mqtt_broker_port: u16,

    /// MQTT client id.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "lidar-bridge")]
    pub mqtt_client_id: String,

    /// MQTT username.
    #[arg(long, env = "MQTT_USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password.
    #[arg(long, env = "MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Root of the outbound topic tree.
    #[arg(long, env = "MQTT_BASE_TOPIC")]
    pub mqtt_base_topic: String,

    /// Producer id carried in every envelope.
    #[arg(long, env = "PRODUCER_ID", default_value = "lidar")]
    pub producer_id: String,

    /// Envelope schema version; must be known to the schema registry.
    #[arg(long, env = "SCHEMA_VERSION", default_value = "0.1.0")]
    pub schema_version: String,

    /// Publish attempts per envelope, including the first.
    #[arg(long, env = "PUBLISH_MAX_ATTEMPTS", default_value = "4")]
    pub publish_max_attempts: u32,

    /// Backoff before the first publish retry, in milliseconds.
    #[arg(long, env = "PUBLISH_BACKOFF_MS", default_value = "100")]
    pub publish_backoff_ms: u64,

    /// Backoff ceiling, in milliseconds.
    #[arg(long, env = "PUBLISH_BACKOFF_MAX_MS", default_value = "5000")]
    pub publish_backoff_max_ms: u64,

    /// Acknowledgment wait per publish attempt, in milliseconds.
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value = "10000")]
    pub publish_timeout_ms: u64,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}

impl Args {
    /// Multicast group derived from the conference id.
    pub fn group(&self) -> SocketAddrV4 {
        SocketAddrV4::new(
            Ipv4Addr::new(GROUP_BASE[0], GROUP_BASE[1], GROUP_BASE[2], self.cid),
            GROUP_PORT,
        )
    }

    /// Retry policy from the publish knobs.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish_max_attempts,
            initial_backoff: std::time::Duration::from_millis(self.publish_backoff_ms),
            max_backoff: std::time::Duration::from_millis(self.publish_backoff_max_ms),
            attempt_timeout: std::time::Duration::from_millis(self.publish_timeout_ms),
        }
    }
}
