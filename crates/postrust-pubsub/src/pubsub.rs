//! The public pub/sub client: connect/listen/unlisten/notify, plus the
//! notification demultiplexer that decides what an incoming notification
//! means for this process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::codec;
use crate::config::PubSubConfig;
use crate::emitter::{ChannelEmitter, HandlerId};
use crate::error::{Error, Result};
use crate::event::PubSubEvent;
use crate::ident::ChannelMangler;
use crate::lock::{ChannelLock, Lock, NoOpLock};
use crate::supervisor::{ConnectionState, Supervisor};
use crate::transport::{Notification, PgConnector, PgTransport};

/// A pub/sub client bound to one logical database connection. Always
/// handed out as an `Arc`: the notification-demultiplexer task and the
/// per-lock failover handlers both need to outlive the call that created
/// them.
pub struct PubSub {
    config: PubSubConfig,
    mangler: ChannelMangler,
    supervisor: Arc<Supervisor>,
    locks: Mutex<HashMap<String, Arc<dyn Lock>>>,
    emitter: Arc<ChannelEmitter>,
    events: broadcast::Sender<PubSubEvent>,
    demux_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PubSub {
    pub fn new(config: PubSubConfig, connector: Arc<dyn PgConnector>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        let mangler = ChannelMangler::new(config.schema_name.clone());
        let supervisor = Arc::new(Supervisor::new(connector, &config, events_tx.clone()));

        Arc::new(Self {
            config,
            mangler,
            supervisor,
            locks: Mutex::new(HashMap::new()),
            emitter: Arc::new(ChannelEmitter::new()),
            events: events_tx,
            demux_handle: Mutex::new(None),
        })
    }

    /// Subscribe to the lifecycle/traffic event bus.
    pub fn events(&self) -> broadcast::Receiver<PubSubEvent> {
        self.events.subscribe()
    }

    /// Register a handler invoked on every payload delivered for `channel`.
    pub fn on<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.emitter.on(channel, handler)
    }

    /// Register a handler invoked at most once for `channel`.
    pub fn once<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.emitter.once(channel, handler)
    }

    /// Remove a single payload handler by id.
    pub fn off(&self, channel: &str, id: HandlerId) -> bool {
        self.emitter.off(channel, id)
    }

    /// Connect the underlying transport and start the notification
    /// demultiplexer. Calling this again after `close()` re-arms the
    /// supervisor and re-initializes every lock still in the registry
    /// (idempotent re-init).
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let known = self.currently_listened_channels().await;
        self.supervisor.connect(&known).await?;
        self.rebuild_locks_after_reconnect().await?;
        self.start_demux_if_needed();
        Ok(())
    }

    /// Transition to closed without releasing any held locks. Use
    /// `destroy()` to release locks as well.
    pub async fn close(&self) {
        self.supervisor.close().await;
        if let Some(handle) = self.demux_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// `close()` plus release every held lock and drop every payload
    /// handler.
    pub async fn destroy(&self) {
        self.close().await;

        let drained: Vec<Arc<dyn Lock>> = {
            let mut locks = self.locks.lock().await;
            locks.drain().map(|(_, lock)| lock).collect()
        };
        for lock in drained {
            lock.destroy().await;
        }
        self.emitter.clear();
    }

    /// Obtain (creating if necessary) the lock for `channel`, attempt
    /// acquisition, and `LISTEN` on success. Returns `Ok(())` even when the
    /// channel is currently contended by another process — check
    /// `is_active(channel)` to tell the two cases apart.
    pub async fn listen(&self, channel: &str) -> Result<()> {
        let transport = self.require_transport().await?;

        let lock = {
            let existing = {
                let locks = self.locks.lock().await;
                locks.get(channel).cloned()
            };
            match existing {
                Some(lock) => lock,
                None => {
                    let lock = self.build_lock(channel, transport.clone());
                    lock.init().await?;
                    self.wire_release_handler(&lock, channel, transport.clone());
                    let mut locks = self.locks.lock().await;
                    locks.entry(channel.to_string()).or_insert(lock).clone()
                }
            }
        };

        if lock.acquire().await? {
            transport.listen(channel).await?;
            let _ = self.events.send(PubSubEvent::Listen(channel.to_string()));
        }
        Ok(())
    }

    /// `UNLISTEN` and release the channel's lock, if any.
    pub async fn unlisten(&self, channel: &str) -> Result<()> {
        let transport = self.require_transport().await?;
        transport.unlisten(channel).await?;

        let lock = {
            let mut locks = self.locks.lock().await;
            locks.remove(channel)
        };
        if let Some(lock) = lock {
            lock.destroy().await;
        }
        let _ = self
            .events
            .send(PubSubEvent::Unlisten(vec![channel.to_string()]));
        Ok(())
    }

    /// `UNLISTEN *` and release every registered lock.
    pub async fn unlisten_all(&self) -> Result<()> {
        let transport = self.require_transport().await?;
        transport.unlisten_all().await?;

        let drained: Vec<(String, Arc<dyn Lock>)> = {
            let mut locks = self.locks.lock().await;
            locks.drain().collect()
        };
        let names: Vec<String> = drained.iter().map(|(name, _)| name.clone()).collect();
        for (_, lock) in drained {
            lock.destroy().await;
        }
        let _ = self.events.send(PubSubEvent::Unlisten(names));
        Ok(())
    }

    /// Publish `payload` on `channel`.
    pub async fn notify(&self, channel: &str, payload: &Value) -> Result<()> {
        let transport = self.require_transport().await?;
        let literal = postrust_sql::quote_literal(&codec::pack(payload));
        transport.notify(channel, &literal).await?;
        let _ = self
            .events
            .send(PubSubEvent::Notify(channel.to_string(), payload.clone()));
        Ok(())
    }

    /// Channels whose lock this process currently holds (always "all
    /// registered channels" in multi-listener mode).
    pub async fn active_channels(&self) -> Vec<String> {
        let locks = self.locks.lock().await;
        locks
            .iter()
            .filter(|(_, lock)| lock.is_acquired())
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Channels registered but not currently held by this process.
    pub async fn inactive_channels(&self) -> Vec<String> {
        let locks = self.locks.lock().await;
        locks
            .iter()
            .filter(|(_, lock)| !lock.is_acquired())
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Every channel currently registered, regardless of lock state.
    pub async fn all_channels(&self) -> Vec<String> {
        let locks = self.locks.lock().await;
        locks.keys().cloned().collect()
    }

    /// Whether `channel` (or, if `None`, any channel) is currently held.
    pub async fn is_active(&self, channel: Option<&str>) -> bool {
        let locks = self.locks.lock().await;
        match channel {
            Some(channel) => locks.get(channel).map(|lock| lock.is_acquired()).unwrap_or(false),
            None => locks.values().any(|lock| lock.is_acquired()),
        }
    }

    async fn require_transport(&self) -> Result<Arc<dyn PgTransport>> {
        self.supervisor.transport().await.ok_or(Error::Closed)
    }

    async fn currently_listened_channels(&self) -> Vec<String> {
        let locks = self.locks.lock().await;
        locks
            .iter()
            .filter(|(_, lock)| lock.is_acquired())
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    fn build_lock(&self, channel: &str, transport: Arc<dyn PgTransport>) -> Arc<dyn Lock> {
        if self.config.single_listener {
            ChannelLock::new(
                channel,
                transport,
                self.mangler.tag(),
                self.config.schema_name.clone(),
                Duration::from_millis(self.config.acquire_interval_ms),
            ) as Arc<dyn Lock>
        } else {
            Arc::new(NoOpLock::new(channel)) as Arc<dyn Lock>
        }
    }

    /// Install the one release-notification handler that drives failover:
    /// when this lock's internal channel receives a release notification,
    /// attempt to re-acquire, and on success `LISTEN` the user channel and
    /// emit a `Listen` event, since that `LISTEN` was never issued while
    /// this process held no lock.
    fn wire_release_handler(&self, lock: &Arc<dyn Lock>, channel: &str, transport: Arc<dyn PgTransport>) {
        if !self.config.single_listener {
            return;
        }

        let weak_lock = Arc::downgrade(lock);
        let events = self.events.clone();
        let channel_owned = channel.to_string();

        let _ = lock.on_release(Box::new(move |_unmangled_channel: &str| {
            let weak_lock = weak_lock.clone();
            let transport = transport.clone();
            let events = events.clone();
            let channel_owned = channel_owned.clone();
            tokio::spawn(async move {
                let Some(lock) = weak_lock.upgrade() else {
                    return;
                };
                match lock.acquire().await {
                    Ok(true) => {
                        if let Err(err) = transport.listen(&channel_owned).await {
                            tracing::warn!(channel = %channel_owned, error = %err, "failed to LISTEN after winning failover");
                            return;
                        }
                        let _ = events.send(PubSubEvent::Listen(channel_owned.clone()));
                    }
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(channel = %channel_owned, error = %err, "re-acquire after release notification failed");
                    }
                }
            });
        }));
    }

    /// Rebuild every registered lock against the current transport after a
    /// (re)connect. Old lock instances are simply dropped: their timers and
    /// roster entries age out once their last `Arc` disappears.
    async fn rebuild_locks_after_reconnect(&self) -> Result<()> {
        if !self.config.single_listener {
            return Ok(());
        }

        let transport = self.require_transport().await?;
        let entries: Vec<(String, bool)> = {
            let locks = self.locks.lock().await;
            locks
                .iter()
                .map(|(channel, lock)| (channel.clone(), lock.is_acquired()))
                .collect()
        };

        for (channel, was_active) in entries {
            let new_lock = self.build_lock(&channel, transport.clone());
            new_lock.init().await?;
            self.wire_release_handler(&new_lock, &channel, transport.clone());
            let acquired = new_lock.acquire().await?;

            {
                let mut locks = self.locks.lock().await;
                locks.insert(channel.clone(), new_lock);
            }

            if acquired && !was_active {
                transport.listen(&channel).await?;
                let _ = self.events.send(PubSubEvent::Listen(channel));
            }
        }
        Ok(())
    }

    fn start_demux_if_needed(self: &Arc<Self>) {
        let facade = Arc::clone(self);
        tokio::spawn(async move {
            let mut handle_guard = facade.demux_handle.lock().await;
            if handle_guard.is_some() {
                return;
            }
            let loop_facade = Arc::clone(&facade);
            *handle_guard = Some(tokio::spawn(async move {
                loop_facade.demux_loop().await;
            }));
        });
    }

    async fn demux_loop(self: Arc<Self>) {
        loop {
            let Some(transport) = self.supervisor.transport().await else {
                return;
            };

            match transport.recv_notification().await {
                Some(notification) => self.handle_notification(notification).await,
                None => {
                    let _ = self.events.send(PubSubEvent::End);
                    if self.supervisor.state().await == ConnectionState::Closed {
                        return;
                    }

                    let known = self.currently_listened_channels().await;
                    if let Err(err) = self.supervisor.connect(&known).await {
                        tracing::warn!(error = %err, "reconnect after connection loss failed permanently");
                        return;
                    }
                    if let Err(err) = self.rebuild_locks_after_reconnect().await {
                        tracing::warn!(error = %err, "failed to rebuild locks after reconnect");
                    }
                }
            }
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        if self.mangler.is_internal(&notification.channel) {
            let user_channel = self.mangler.unmangle(&notification.channel);
            let locks = self.locks.lock().await;
            if let Some(lock) = locks.get(user_channel) {
                lock.notify_released();
            }
            return;
        }

        if self.config.filtered {
            if let Some(pid) = self.supervisor.backend_pid().await {
                if pid == notification.process_id {
                    return;
                }
            }
        }

        if self.config.single_listener && !self.config.execution_lock {
            let locks = self.locks.lock().await;
            let acquired = locks
                .get(&notification.channel)
                .map(|lock| lock.is_acquired())
                .unwrap_or(false);
            drop(locks);
            if !acquired {
                return;
            }
        }

        let payload = codec::unpack(&notification.payload);
        let _ = self
            .events
            .send(PubSubEvent::Message(notification.channel.clone(), payload.clone()));
        self.emitter.emit(&notification.channel, &payload);
    }
}
