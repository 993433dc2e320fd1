// SPDX-License-Identifier: Apache-2.0

//! Dispatch pipeline: receive → decode → envelope → publish.
//!
//! A single task owns the loop, so per-sender sequence numbers reach the
//! broker in arrival order by construction.  Each datagram moves through
//! the states `Received → Decoding → Decoded|DecodeFailed → Enveloping →
//! Published|PublishFailed`; a decode failure drops the datagram and the
//! loop keeps running, a transient publish failure (including an attempt
//! that times out waiting for the ack) is retried with bounded exponential
//! backoff, and only a fatal broker error (or an external shutdown signal)
//! ends the loop.
//!
//! The bus splits one sensor revolution across several datagrams, so the
//! pipeline accumulates `envelopes_per_revolution` consecutive scans per
//! sender and merges them into one envelope.  A partial batch at shutdown
//! is dropped; the stream is best-effort.

use crate::{
    bus::{DecodeError, Header, HeaderSlice, MessageKind},
    envelope::{Envelope, StampSource, SystemStamp},
    publisher::{topic_for, Publisher, PublishError, RetryPolicy},
    scan::{self, LidarPayload, Scan},
    schema::{SchemaRegistry, Validator},
    source::DatagramSource,
};
use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Receive buffer size; generous for any single UDP datagram.
const RECV_BUF_LEN: usize = 64 * 1024;

/// Errors that prevent the bridge from starting.
///
/// These are fatal before the receive loop runs; the process exits non-zero.
/// Per-message decode and publish failures never become a `ConfigError`.
#[derive(Debug)]
pub enum ConfigError {
    /// The configured envelope schema version is not in the registry.
    SchemaMismatch(String),
    /// The multicast group could not be bound or joined.
    Bind(io::Error),
    /// The broker connection failed fatally.
    Broker(String),
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::SchemaMismatch(version) => {
                write!(f, "unknown envelope schema version: {}", version)
            }
            ConfigError::Bind(err) => write!(f, "cannot bind multicast group: {}", err),
            ConfigError::Broker(msg) => write!(f, "broker error: {}", msg),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::Bind(err)
    }
}

/// Observable counters for the bridge.
///
/// Sustained failure degrades to dropped messages with visible counts,
/// never a silent hang.
#[derive(Debug, Default)]
pub struct BridgeStats {
    received: AtomicU64,
    decoded: AtomicU64,
    decode_failures: AtomicU64,
    skipped: AtomicU64,
    published: AtomicU64,
    retries: AtomicU64,
    dropped: AtomicU64,
}

impl BridgeStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Datagrams recognized but not routed (unknown ids, non-LiDAR kinds).
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bridge configuration, all orthogonal to the transport collaborators.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Stable producer id carried in every envelope and topic.
    pub producer_id: String,
    /// Envelope schema version; must be registered at startup.
    pub schema_version: String,
    /// Topic root the deterministic topic mapping hangs off.
    pub topic_root: String,
    /// Bus datagrams per full sensor revolution.
    pub envelopes_per_revolution: usize,
    /// Retry policy at the publish boundary.
    pub retry: RetryPolicy,
}

/// The dispatch pipeline.
///
/// Owns the publisher adapter for its lifetime; the datagram source is
/// borrowed for the duration of [`Bridge::run`].
pub struct Bridge<P> {
    config: BridgeConfig,
    publisher: P,
    stamp: Box<dyn StampSource>,
    validator: Validator,
    topic: String,
    stats: Arc<BridgeStats>,
    /// Pending revolution segments, keyed by sender id.
    batches: HashMap<u32, Vec<Scan>>,
}

impl<P: Publisher> Bridge<P> {
    /// Build a bridge, resolving the schema validator at startup.
    pub fn new(
        config: BridgeConfig,
        publisher: P,
        registry: &SchemaRegistry,
    ) -> Result<Self, ConfigError> {
        let validator = registry
            .validator_for(&config.schema_version)
            .ok_or_else(|| ConfigError::SchemaMismatch(config.schema_version.clone()))?;
        let topic = topic_for(
            &config.topic_root,
            &config.producer_id,
            MessageKind::PointCloud.as_str(),
        );

        Ok(Self {
            config,
            publisher,
            stamp: Box::new(SystemStamp),
            validator,
            topic,
            stats: Arc::new(BridgeStats::default()),
            batches: HashMap::new(),
        })
    }

    /// Replace the stamp source (fixed clocks/ids in tests).
    pub fn with_stamp_source(mut self, stamp: Box<dyn StampSource>) -> Self {
        self.stamp = stamp;
        self
    }

    /// Shared handle to the bridge counters.
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Run the receive loop until the source is exhausted, a shutdown signal
    /// arrives, or a fatal publish error surfaces.
    ///
    /// A shutdown signal stops datagram intake; an in-flight publish (and
    /// its bounded retries) completes first, then the loop returns cleanly.
    pub async fn run<S: DatagramSource>(
        mut self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PublishError> {
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            if !source.has_more() || *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                received = source.recv(&mut buf) => match received {
                    Ok(len) => {
                        BridgeStats::incr(&self.stats.received);
                        self.handle_datagram(&buf[..len]).await?;
                    }
                    Err(err) => {
                        if source.has_more() {
                            warn!("receive error: {}", err);
                        } else {
                            break;
                        }
                    }
                },
            }
        }

        let pending: usize = self.batches.values().map(Vec::len).sum();
        if pending > 0 {
            debug!("discarding {} partial revolution segment(s) at shutdown", pending);
        }
        info!(
            received = self.stats.received(),
            published = self.stats.published(),
            dropped = self.stats.dropped(),
            decode_failures = self.stats.decode_failures(),
            "bridge loop finished"
        );

        Ok(())
    }

    /// One decode cycle.  Per-message failures are counted and absorbed;
    /// only a fatal publish error propagates.
    async fn handle_datagram(&mut self, datagram: &[u8]) -> Result<(), PublishError> {
        let slice = match HeaderSlice::from_slice(datagram) {
            Ok(slice) => slice,
            Err(err) => {
                BridgeStats::incr(&self.stats.decode_failures);
                debug!("dropping datagram: {}", err);
                return Ok(());
            }
        };
        let header = slice.to_header();

        match slice.kind() {
            Ok(MessageKind::PointCloud) => {
                let scan = match scan::decode(slice.payload()) {
                    Ok(scan) => scan,
                    Err(err) => {
                        BridgeStats::incr(&self.stats.decode_failures);
                        debug!(sender = header.sender_id, "dropping scan: {}", err);
                        return Ok(());
                    }
                };
                BridgeStats::incr(&self.stats.decoded);
                trace!(
                    sender = header.sender_id,
                    sequence = header.sequence,
                    points = scan.len(),
                    "decoded scan segment"
                );

                let batch = self.batches.entry(header.sender_id).or_default();
                batch.push(scan);
                if batch.len() >= self.config.envelopes_per_revolution {
                    let scans = std::mem::take(batch);
                    self.publish_revolution(&scans, &header).await?;
                }
            }
            Ok(kind) => {
                // Recognized but not bridged; fusion with position/heading
                // streams is out of scope.
                BridgeStats::incr(&self.stats.skipped);
                trace!(sender = header.sender_id, "skipping {} message", kind);
            }
            Err(DecodeError::UnknownMessageType(id)) => {
                BridgeStats::incr(&self.stats.skipped);
                debug!(sender = header.sender_id, "skipping unknown message id {}", id);
            }
            Err(err) => {
                BridgeStats::incr(&self.stats.decode_failures);
                debug!("dropping datagram: {}", err);
            }
        }

        Ok(())
    }

    /// Envelope a completed revolution and hand it to the publisher.
    async fn publish_revolution(
        &mut self,
        scans: &[Scan],
        header: &Header,
    ) -> Result<(), PublishError> {
        let payload = LidarPayload::from_scans(scans, header.sequence);
        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(err) => {
                BridgeStats::incr(&self.stats.dropped);
                warn!("dropping revolution, payload serialization failed: {}", err);
                return Ok(());
            }
        };

        if let Err(violation) = (self.validator)(&value) {
            BridgeStats::incr(&self.stats.dropped);
            warn!("dropping revolution, schema violation: {}", violation);
            return Ok(());
        }

        let envelope = Envelope::wrap(
            value,
            &self.config.producer_id,
            &self.config.schema_version,
            self.stamp.as_ref(),
        );
        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                BridgeStats::incr(&self.stats.dropped);
                warn!("dropping envelope, serialization failed: {}", err);
                return Ok(());
            }
        };

        self.publish_with_retry(body).await
    }

    /// Publish with the configured bounded-backoff policy.
    ///
    /// Each attempt's acknowledgment wait is capped by the policy's attempt
    /// timeout; an attempt that exceeds it counts as a transient failure, so
    /// a sink that stops acknowledging can stall the loop for at most
    /// `max_attempts` timeouts plus backoffs before the message is dropped.
    /// Exhausting the retry budget drops the message and counts it; the
    /// caller keeps processing.  Only fatal errors propagate.
    async fn publish_with_retry(&self, body: Vec<u8>) -> Result<(), PublishError> {
        let policy = self.config.retry;

        for attempt in 0..policy.max_attempts {
            let outcome = match tokio::time::timeout(
                policy.attempt_timeout,
                self.publisher.publish(&self.topic, body.clone()),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(PublishError::Transient(format!(
                    "no acknowledgment within {}ms",
                    policy.attempt_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(()) => {
                    BridgeStats::incr(&self.stats.published);
                    trace!(topic = %self.topic, "envelope published");
                    return Ok(());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    if attempt + 1 < policy.max_attempts {
                        BridgeStats::incr(&self.stats.retries);
                        let backoff = policy.backoff_for(attempt);
                        debug!(
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "publish failed, retrying: {}",
                            err
                        );
                        tokio::time::sleep(backoff).await;
                    } else {
                        warn!(
                            "dropping envelope after {} attempts: {}",
                            policy.max_attempts, err
                        );
                    }
                }
            }
        }

        BridgeStats::incr(&self.stats.dropped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{encode_datagram, MSG_POINT_CLOUD},
        publisher::RecordingPublisher,
        scan::Scan,
        source::ReplaySource,
    };

    fn test_config(envelopes_per_revolution: usize) -> BridgeConfig {
        BridgeConfig {
            producer_id: "lidar-0".to_string(),
            schema_version: "0.1.0".to_string(),
            topic_root: "sensors".to_string(),
            envelopes_per_revolution,
            retry: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::default()
            },
        }
    }

    fn scan_datagram(sender: u32, sequence: u32, start: f32, end: f32) -> Vec<u8> {
        let scan = Scan::new(start, end, 4, 1_000, vec![500; 8]);
        encode_datagram(MSG_POINT_CLOUD, sender, sequence, &scan.encode())
    }

    #[test]
    fn test_unknown_schema_version_is_config_error() {
        let config = BridgeConfig {
            schema_version: "9.9.9".to_string(),
            ..test_config(1)
        };
        let result = Bridge::new(config, RecordingPublisher::new(), &SchemaRegistry::default());
        assert!(matches!(result, Err(ConfigError::SchemaMismatch(_))));
    }

    #[tokio::test]
    async fn test_batches_per_sender() {
        // Two senders interleaved: each needs two segments per revolution,
        // so exactly two envelopes come out, one per sender.
        let datagrams = vec![
            scan_datagram(1, 0, 0.0, 170.0),
            scan_datagram(2, 0, 0.0, 170.0),
            scan_datagram(1, 1, 180.0, 350.0),
            scan_datagram(2, 1, 180.0, 350.0),
        ];

        let bridge = Bridge::new(
            test_config(2),
            RecordingPublisher::new(),
            &SchemaRegistry::default(),
        )
        .unwrap();
        let stats = bridge.stats();

        let mut source = ReplaySource::new(datagrams);
        let (_tx, rx) = watch::channel(false);
        bridge.run(&mut source, rx).await.unwrap();

        assert_eq!(stats.received(), 4);
        assert_eq!(stats.decoded(), 4);
        assert_eq!(stats.published(), 2);
        assert_eq!(stats.dropped(), 0);
    }

    #[tokio::test]
    async fn test_partial_batch_dropped_at_end() {
        let bridge = Bridge::new(
            test_config(2),
            RecordingPublisher::new(),
            &SchemaRegistry::default(),
        )
        .unwrap();
        let stats = bridge.stats();

        let mut source = ReplaySource::new(vec![scan_datagram(1, 0, 0.0, 170.0)]);
        let (_tx, rx) = watch::channel(false);
        bridge.run(&mut source, rx).await.unwrap();

        assert_eq!(stats.decoded(), 1);
        assert_eq!(stats.published(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_intake() {
        let bridge = Bridge::new(
            test_config(1),
            RecordingPublisher::new(),
            &SchemaRegistry::default(),
        )
        .unwrap();
        let stats = bridge.stats();

        // Signal raised before the loop starts: nothing is consumed.
        let mut source = ReplaySource::new(vec![scan_datagram(1, 0, 0.0, 350.0)]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        bridge.run(&mut source, rx).await.unwrap();

        assert_eq!(stats.received(), 0);
        assert!(source.has_more());
    }
}
