// SPDX-License-Identifier: Apache-2.0

//! LiDAR sensor-bus to MQTT bridge library.
//!
//! This library bridges an OD4-style UDP multicast sensor bus carrying
//! binary LiDAR frames to an MQTT broker, re-encoding each revolution into
//! a versioned JSON envelope.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │  DatagramSource  │ ──► │   Bridge     │ ──► │   Publisher    │
//! │  (multicast/test)│     │  (pipeline)  │     │  (MQTT/test)   │
//! └──────────────────┘     └──────┬───────┘     └────────────────┘
//!                                 │
//!                   ┌─────────────┼─────────────┐
//!                   ▼             ▼             ▼
//!              ┌─────────┐   ┌─────────┐   ┌──────────┐
//!              │  bus    │   │  scan   │   │ envelope │
//!              │ header  │   │ decode  │   │  + schema│
//!              └─────────┘   └─────────┘   └──────────┘
//! ```
//!
//! One task owns the receive loop and runs decode → envelope → publish
//! synchronously per datagram, preserving per-sender sequence order all the
//! way to the broker.  Malformed or unknown traffic is counted and skipped;
//! the loop only ends on shutdown or a fatal broker error.
//!
//! # Modules
//!
//! - [`bus`]: datagram header layout and message-id registry
//! - [`scan`]: LiDAR payload decoding and Cartesian conversion
//! - [`envelope`]: versioned envelope construction
//! - [`schema`]: load-time registry of payload validators
//! - [`pipeline`]: the dispatch loop, batching, and failure policy
//! - [`publisher`]: the broker boundary and retry policy
//! - [`source`]: datagram source abstraction for live and test operation
//!
//! # Example
//!
//! ```ignore
//! use lidar_bridge::{
//!     pipeline::{Bridge, BridgeConfig},
//!     publisher::RetryPolicy,
//!     schema::SchemaRegistry,
//!     source::MulticastSource,
//! };
//!
//! let registry = SchemaRegistry::with_builtin();
//! let bridge = Bridge::new(config, publisher, &registry)?;
//! let mut source = MulticastSource::join(group, interface).await?;
//! bridge.run(&mut source, shutdown_rx).await?;
//! ```

pub mod args;
pub mod bus;
pub mod envelope;
pub mod pipeline;
pub mod publisher;
pub mod scan;
pub mod schema;
pub mod source;

// Re-exports for convenience
pub use bus::{DecodeError, Header, HeaderSlice, MessageKind};
pub use envelope::{Envelope, StampSource, SystemStamp};
pub use pipeline::{Bridge, BridgeConfig, BridgeStats, ConfigError};
pub use publisher::{MqttPublisher, PublishError, Publisher, RetryPolicy};
pub use scan::{LidarPayload, Scan};
pub use schema::SchemaRegistry;
pub use source::{DatagramSource, MulticastSource, ReplaySource};
