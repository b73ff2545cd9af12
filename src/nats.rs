//! NATS streaming adapter
//!
//! Bridges the event store's live subscriptions onto NATS subjects so
//! external consumers (dashboards, downstream processors) can follow
//! runs without touching the store. This is an adapter over the core
//! contracts; the core never depends on it.

use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::{EventStoreError, EventStoreResult};
use crate::event_store::EventSubscription;
use crate::subjects::event_subject;

/// Configuration for the NATS connection
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "agent-observability".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// NATS client wrapper providing the operations the adapter needs
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect with the given configuration
    pub async fn new(config: NatsConfig) -> EventStoreResult<Self> {
        let connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout));

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| EventStoreError::ConnectionFailed(anyhow::Error::new(e)))?;

        info!("connected to NATS at {:?}", config.servers);

        Ok(Self { client })
    }

    /// Publish a message as JSON to a subject
    pub async fn publish<T>(&self, subject: &str, message: &T) -> EventStoreResult<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)
            .map_err(|e| EventStoreError::InvalidEvent(e.to_string()))?;

        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| EventStoreError::ConnectionFailed(anyhow::Error::new(e)))?;

        debug!(subject = %subject, "published event");
        Ok(())
    }

    /// Underlying NATS client for advanced operations
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Forwards a live event subscription onto NATS subjects
///
/// Each event lands on `agents.events.{run_id}.{event_type}`. The
/// publisher runs until the subscription closes; dropping the
/// subscription (or the store) ends it.
pub struct EventStreamPublisher {
    client: NatsClient,
}

impl EventStreamPublisher {
    /// Create a publisher over a connected client
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }

    /// Drain the subscription onto NATS on a background task
    pub fn run(self, mut subscription: EventSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            let run_id = subscription.run_id().to_string();
            info!(run_id = %run_id, "event stream publisher started");

            while let Some(event) = subscription.recv().await {
                let subject = event_subject(&event.run_id, event.event_type);
                if let Err(e) = self.client.publish(&subject, &event).await {
                    error!(subject = %subject, error = %e, "failed to publish event");
                }
            }

            info!(run_id = %run_id, "event stream publisher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::events::payload::RunStarted;
    use crate::events::{Event, EventPayload};

    // Integration tests with a real NATS server, ignored by default.

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn events_flow_from_store_to_nats() -> Result<(), Box<dyn std::error::Error>> {
        let client = NatsClient::new(NatsConfig::default()).await?;
        let mut nats_sub = client
            .inner()
            .subscribe("agents.events.run-1.>".to_string())
            .await?;

        let store = InMemoryEventStore::new();
        let subscription = store.subscribe("run-1").await?;
        let publisher = EventStreamPublisher::new(client.clone());
        let handle = publisher.run(subscription);

        let payload = EventPayload::RunStarted(RunStarted {
            goal: "integration".to_string(),
            vars: None,
        });
        store.append(vec![Event::new("run-1", &payload)?]).await?;

        use futures::StreamExt;
        let message = nats_sub.next().await.ok_or("no message")?;
        assert!(message.subject.ends_with("run_started"));

        handle.abort();
        Ok(())
    }
}
