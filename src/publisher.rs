// SPDX-License-Identifier: Apache-2.0

//! Publisher adapter boundary.
//!
//! The bridge treats the broker as an external collaborator behind the
//! [`Publisher`] trait: publish bytes to a topic, get an ack or an error.
//! Delivery is at-most-once; the adapter keeps no acknowledgment state.
//! What *is* part of the bridge is the policy at this call boundary:
//! each attempt waits a bounded time for the ack, transient errors are
//! retried with bounded exponential backoff, fatal errors (the broker
//! rejecting our credentials) stop the pipeline.
//!
//! Topic names are derived deterministically: `{root}/{producer}/{kind}`,
//! e.g. `crowsnest/lidar-0/lidar`.

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, MqttOptions, QoS};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{trace, warn};

/// Errors reported at the publish boundary.
#[derive(Debug)]
pub enum PublishError {
    /// The broker may come back; retry per the configured policy.
    Transient(String),
    /// The broker will not accept us (e.g. bad credentials); stop the
    /// pipeline and surface to the supervisor.
    Fatal(String),
}

impl std::error::Error for PublishError {}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublishError::Transient(msg) => write!(f, "transient publish error: {}", msg),
            PublishError::Fatal(msg) => write!(f, "fatal publish error: {}", msg),
        }
    }
}

impl PublishError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Fatal(_))
    }
}

/// Bounded exponential backoff policy for transient publish failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total publish attempts per message, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Upper bound on the acknowledgment wait per attempt.  An attempt that
    /// exceeds it counts as a transient failure; the wait is never unbounded.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(retry));
        exp.min(self.max_backoff)
    }
}

/// Deterministic topic mapping from producer id and message kind.
pub fn topic_for(root: &str, producer_id: &str, kind: &str) -> String {
    format!("{}/{}/{}", root.trim_end_matches('/'), producer_id, kind)
}

/// Trait for message sinks.
///
/// Implementations hand the serialized envelope to the broker (or record it,
/// for tests).  The future resolves with an ack or a [`PublishError`].
pub trait Publisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        (**self).publish(topic, body)
    }
}

/// MQTT publisher over a rumqttc async client.
///
/// The adapter owns the broker connection: a spawned task drives the rumqttc
/// event loop, reconnecting on transient failures and latching a fatal state
/// when the broker refuses our credentials.
pub struct MqttPublisher {
    client: AsyncClient,
    fatal: Arc<Mutex<Option<String>>>,
}

impl MqttPublisher {
    /// Connect to the broker and start the event-loop task.
    ///
    /// Connection establishment is asynchronous; publishes enqueued before
    /// the session is up are flushed once it is.
    pub fn connect(options: MqttOptions) -> MqttPublisher {
        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let fatal = Arc::new(Mutex::new(None));

        let latch = Arc::clone(&fatal);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => trace!(?event, "mqtt event"),
                    Err(ConnectionError::ConnectionRefused(code))
                        if matches!(
                            code,
                            ConnectReturnCode::NotAuthorized
                                | ConnectReturnCode::BadUserNamePassword
                        ) =>
                    {
                        *latch.lock().unwrap() =
                            Some(format!("broker rejected connection: {:?}", code));
                        break;
                    }
                    Err(err) => {
                        warn!("mqtt connection error: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, fatal }
    }
}

impl Publisher for MqttPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(reason) = self.fatal.lock().unwrap().clone() {
                return Err(PublishError::Fatal(reason));
            }

            // At-most-once: QoS 0, no retained state at the broker.
            self.client
                .publish(topic, QoS::AtMostOnce, false, body)
                .await
                .map_err(|err| PublishError::Transient(err.to_string()))
        })
    }
}

/// Recording publisher for tests: stores every publish in memory.
pub struct RecordingPublisher {
    records: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// All recorded (topic, body) pairs in publish order.
    pub fn records(&self) -> Vec<(String, Vec<u8>)> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for RecordingPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            self.records.lock().unwrap().push((topic.to_string(), body));
            Ok(())
        })
    }
}

/// Flaky publisher for tests: fails the first `failures` publishes with a
/// transient error, then records like [`RecordingPublisher`].
pub struct FlakyPublisher {
    failures: Mutex<u32>,
    inner: RecordingPublisher,
}

impl FlakyPublisher {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: Mutex::new(failures),
            inner: RecordingPublisher::new(),
        }
    }

    pub fn records(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.records()
    }
}

impl Publisher for FlakyPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut remaining = self.failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PublishError::Transient("simulated fault".to_string()));
                }
            }
            self.inner.publish(topic, body).await
        })
    }
}

/// Stalling publisher for tests: the first `stalls` publishes never resolve,
/// modeling a sink that stops acknowledging, then records like
/// [`RecordingPublisher`].
pub struct StallingPublisher {
    stalls: Mutex<u32>,
    inner: RecordingPublisher,
}

impl StallingPublisher {
    pub fn new(stalls: u32) -> Self {
        Self {
            stalls: Mutex::new(stalls),
            inner: RecordingPublisher::new(),
        }
    }

    pub fn records(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.records()
    }
}

impl Publisher for StallingPublisher {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + 'a>> {
        Box::pin(async move {
            let stalled = {
                let mut remaining = self.stalls.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    true
                } else {
                    false
                }
            };
            if stalled {
                std::future::pending::<()>().await;
            }
            self.inner.publish(topic, body).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_mapping() {
        assert_eq!(topic_for("crowsnest", "lidar-0", "lidar"), "crowsnest/lidar-0/lidar");
        // Trailing slash on the root does not double up.
        assert_eq!(topic_for("crowsnest/", "lidar-0", "lidar"), "crowsnest/lidar-0/lidar");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(PublishError::Fatal("auth".into()).is_fatal());
        assert!(!PublishError::Transient("net".into()).is_fatal());
    }

    #[tokio::test]
    async fn test_flaky_publisher_recovers() {
        let publisher = FlakyPublisher::new(2);

        assert!(publisher.publish("t", vec![1]).await.is_err());
        assert!(publisher.publish("t", vec![1]).await.is_err());
        assert!(publisher.publish("t", vec![1]).await.is_ok());
        assert_eq!(publisher.records().len(), 1);
    }

    #[tokio::test]
    async fn test_stalling_publisher_resolves_after_stalls() {
        let publisher = StallingPublisher::new(1);

        let stalled =
            tokio::time::timeout(Duration::from_millis(10), publisher.publish("t", vec![1]));
        assert!(stalled.await.is_err());

        assert!(publisher.publish("t", vec![2]).await.is_ok());
        assert_eq!(publisher.records().len(), 1);
    }
}
