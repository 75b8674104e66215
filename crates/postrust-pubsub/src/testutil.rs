//! In-memory fakes for [`PgTransport`]/[`PgConnector`], used by unit tests
//! throughout this crate to exercise contention, failover and notification
//! delivery without a live database.
//!
//! [`FakeCluster`] plays the role of the database: a lock table, a registry
//! of which `application_name`s are still "alive" (standing in for
//! `pg_stat_activity`), and per-channel subscriber fan-out standing in for
//! `LISTEN`/`NOTIFY`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::{AcquireOutcome, Notification, PgConnector, PgTransport};

#[derive(Default)]
struct ClusterState {
    lock_rows: HashMap<String, String>,
    alive_apps: HashSet<String>,
    subscribers: HashMap<String, Vec<tokio::sync::mpsc::UnboundedSender<Notification>>>,
    next_pid: i32,
}

/// A shared fake Postgres cluster backing any number of [`FakeTransport`]
/// connections.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `app` as no longer alive, simulating a dropped connection as
    /// observed by `deadlock_check`'s `pg_stat_activity` lookup.
    pub fn kill(&self, app: &str) {
        self.state.lock().unwrap().alive_apps.remove(app);
    }

    /// Current owner of `mangled_channel`'s lock row, if any.
    pub fn lock_owner(&self, mangled_channel: &str) -> Option<String> {
        self.state.lock().unwrap().lock_rows.get(mangled_channel).cloned()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            cluster: self.clone(),
        }
    }

    fn broadcast(&self, mangled_channel: &str, payload: &str, pid: i32) {
        let state = self.state.lock().unwrap();
        if let Some(subs) = state.subscribers.get(mangled_channel) {
            for sub in subs {
                let _ = sub.send(Notification {
                    channel: mangled_channel.to_string(),
                    payload: payload.to_string(),
                    process_id: pid,
                });
            }
        }
    }
}

/// [`PgConnector`] over a [`FakeCluster`]. Every `connect()` call is a new
/// simulated connection with a fresh backend pid.
pub struct FakeConnector {
    cluster: FakeCluster,
}

#[async_trait]
impl PgConnector for FakeConnector {
    async fn connect(&self, application_name: &str) -> Result<Box<dyn PgTransport>> {
        let mut state = self.cluster.state.lock().unwrap();
        state.alive_apps.insert(application_name.to_string());
        state.next_pid += 1;
        let pid = state.next_pid;
        drop(state);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Ok(Box::new(FakeTransport {
            cluster: self.cluster.clone(),
            application_name: application_name.to_string(),
            pid,
            listening: Mutex::new(Vec::new()),
            inbox_tx: tx,
            inbox_rx: tokio::sync::Mutex::new(rx),
        }))
    }
}

/// A single simulated connection into a [`FakeCluster`].
pub struct FakeTransport {
    cluster: FakeCluster,
    application_name: String,
    pid: i32,
    listening: Mutex<Vec<String>>,
    inbox_tx: tokio::sync::mpsc::UnboundedSender<Notification>,
    inbox_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Notification>>,
}

#[async_trait]
impl PgTransport for FakeTransport {
    fn application_name(&self) -> &str {
        &self.application_name
    }

    async fn listen(&self, mangled_channel: &str) -> Result<()> {
        self.listening.lock().unwrap().push(mangled_channel.to_string());
        self.cluster
            .state
            .lock()
            .unwrap()
            .subscribers
            .entry(mangled_channel.to_string())
            .or_default()
            .push(self.inbox_tx.clone());
        Ok(())
    }

    async fn unlisten(&self, mangled_channel: &str) -> Result<()> {
        self.listening.lock().unwrap().retain(|c| c != mangled_channel);
        Ok(())
    }

    async fn unlisten_all(&self) -> Result<()> {
        self.listening.lock().unwrap().clear();
        Ok(())
    }

    async fn notify(&self, mangled_channel: &str, payload_literal: &str) -> Result<()> {
        let payload = strip_sql_literal(payload_literal);
        self.cluster.broadcast(mangled_channel, &payload, self.pid);
        Ok(())
    }

    async fn backend_pid(&self) -> Result<i32> {
        Ok(self.pid)
    }

    async fn bootstrap_lock_schema(&self, _schema: &str) -> Result<()> {
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        _schema: &str,
        mangled_channel: &str,
        app: &str,
    ) -> Result<AcquireOutcome> {
        let mut state = self.cluster.state.lock().unwrap();
        match state.lock_rows.get(mangled_channel).cloned() {
            Some(owner) if owner != app && state.alive_apps.contains(&owner) => {
                Ok(AcquireOutcome::Locked)
            }
            _ => {
                state.lock_rows.insert(mangled_channel.to_string(), app.to_string());
                Ok(AcquireOutcome::Acquired)
            }
        }
    }

    async fn release_lock(&self, _schema: &str, mangled_channel: &str) -> Result<()> {
        let removed = self.cluster.state.lock().unwrap().lock_rows.remove(mangled_channel);
        if removed.is_some() {
            self.cluster.broadcast(mangled_channel, "1", self.pid);
        }
        Ok(())
    }

    async fn recv_notification(&self) -> Option<Notification> {
        let mut rx = self.inbox_rx.lock().await;
        rx.recv().await
    }

    async fn end(&self) {
        self.cluster.state.lock().unwrap().alive_apps.remove(&self.application_name);
    }
}

fn strip_sql_literal(literal: &str) -> String {
    literal.trim_matches('\'').replace("''", "'")
}

/// A [`PgConnector`] that fails every attempt, for exercising the
/// supervisor's retry/retry-exhaustion paths.
pub struct FailingConnector;

#[async_trait]
impl PgConnector for FailingConnector {
    async fn connect(&self, _application_name: &str) -> Result<Box<dyn PgTransport>> {
        Err(crate::error::Error::Connection("simulated connection failure".to_string()))
    }
}
