// SPDX-License-Identifier: Apache-2.0

//! Versioned outbound envelope construction.
//!
//! Every message published to the broker is wrapped in a self-describing
//! JSON envelope carrying provenance metadata:
//!
//! ```json
//! {
//!   "schemaVersion": "0.1.0",
//!   "messageId": "6f9d…",
//!   "producerId": "lidar-0",
//!   "timestamp": "2025-06-01T12:00:00.000000Z",
//!   "payload": { … }
//! }
//! ```
//!
//! All fields are populated before the publisher ever sees the envelope;
//! there is no partially-built state, and an envelope is immutable once
//! constructed.  Wall-clock and message-id generation sit behind the
//! [`StampSource`] trait so tests can inject fixed values.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source of envelope timestamps and message ids.
pub trait StampSource: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// A fresh message id, unique per call.
    fn message_id(&self) -> Uuid;
}

/// Production stamp source: system clock and random v4 UUIDs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemStamp;

impl StampSource for SystemStamp {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn message_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Fixed stamp source for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedStamp {
    pub time: DateTime<Utc>,
    pub id: Uuid,
}

impl StampSource for FixedStamp {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }

    fn message_id(&self) -> Uuid {
        self.id
    }
}

/// The outbound message unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Version of the envelope schema the payload conforms to.
    pub schema_version: String,
    /// Unique id of this message.
    pub message_id: String,
    /// Stable id of the producing sensor/process.
    pub producer_id: String,
    /// Wall-clock time of envelope construction, RFC 3339 with microseconds.
    pub timestamp: String,
    /// Message payload, structured per the schema's sub-schema for its kind.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload in a fully-populated envelope.
    pub fn wrap(
        payload: serde_json::Value,
        producer_id: &str,
        schema_version: &str,
        stamp: &dyn StampSource,
    ) -> Envelope {
        Envelope {
            schema_version: schema_version.to_string(),
            message_id: stamp.message_id().to_string(),
            producer_id: producer_id.to_string(),
            timestamp: stamp
                .now()
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            payload,
        }
    }

    /// Serialize the envelope to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
