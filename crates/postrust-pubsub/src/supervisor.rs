//! Connection supervisor: reconnect loop, identity assignment, and channel
//! re-subscription on reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::config::PubSubConfig;
use crate::error::{Error, Result};
use crate::event::PubSubEvent;
use crate::transport::{PgConnector, PgTransport};

/// Lifecycle state of the supervised connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Retrying,
    Closed,
}

/// Owns the single persistent database connection for a pub/sub instance,
/// reconnecting with bounded (or unbounded) retries and a fresh identity
/// per attempt.
pub struct Supervisor {
    connector: Arc<dyn PgConnector>,
    retry_delay: Duration,
    retry_limit: Option<u32>,
    state: Mutex<ConnectionState>,
    transport: Mutex<Option<Arc<dyn PgTransport>>>,
    backend_pid: Mutex<Option<i32>>,
    retries: Mutex<u32>,
    events: broadcast::Sender<PubSubEvent>,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn PgConnector>,
        config: &PubSubConfig,
        events: broadcast::Sender<PubSubEvent>,
    ) -> Self {
        Self {
            connector,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_limit: config.retry_limit,
            state: Mutex::new(ConnectionState::Disconnected),
            transport: Mutex::new(None),
            backend_pid: Mutex::new(None),
            retries: Mutex::new(0),
            events,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn backend_pid(&self) -> Option<i32> {
        *self.backend_pid.lock().await
    }

    pub async fn transport(&self) -> Option<Arc<dyn PgTransport>> {
        self.transport.lock().await.clone()
    }

    /// Connect (or reconnect), retrying per `retry_delay`/`retry_limit`
    /// until `Ready` or `Closed`. On success, re-`LISTEN`s every channel in
    /// `known_channels` before returning, so no notification is missed in
    /// the window between connecting and the caller resuming normal
    /// operation.
    pub async fn connect(&self, known_channels: &[String]) -> Result<()> {
        *self.state.lock().await = ConnectionState::Connecting;

        loop {
            let application_name = uuid::Uuid::new_v4().to_string();
            match self.connector.connect(&application_name).await {
                Ok(transport) => {
                    let pid = transport.backend_pid().await?;
                    for channel in known_channels {
                        transport.listen(channel).await?;
                    }

                    *self.backend_pid.lock().await = Some(pid);
                    *self.transport.lock().await = Some(Arc::from(transport));

                    let attempted = {
                        let mut retries = self.retries.lock().await;
                        let attempted = *retries;
                        *retries = 0;
                        attempted
                    };

                    *self.state.lock().await = ConnectionState::Ready;
                    if attempted > 0 {
                        let _ = self.events.send(PubSubEvent::Reconnect(attempted));
                    } else {
                        let _ = self.events.send(PubSubEvent::Connect);
                    }
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(error = %err, "connection attempt failed");

                    let attempts = {
                        let mut retries = self.retries.lock().await;
                        *retries += 1;
                        *retries
                    };

                    if let Some(limit) = self.retry_limit {
                        if attempts >= limit {
                            *self.state.lock().await = ConnectionState::Closed;
                            let _ = self.events.send(PubSubEvent::Error(format!(
                                "Connect failed after {attempts} retries, giving up"
                            )));
                            let _ = self.events.send(PubSubEvent::Close);
                            return Err(Error::RetriesExhausted { attempts });
                        }
                    }

                    *self.state.lock().await = ConnectionState::Retrying;
                    tokio::time::sleep(self.retry_delay).await;
                    *self.state.lock().await = ConnectionState::Connecting;
                }
            }
        }
    }

    /// End the connection and transition to `Closed`. Does not touch any
    /// held locks; that is the facade's responsibility via `destroy()`.
    pub async fn close(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.end().await;
        }
        *self.state.lock().await = ConnectionState::Closed;
        let _ = self.events.send(PubSubEvent::Close);
    }
}
