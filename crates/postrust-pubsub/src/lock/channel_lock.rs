//! The database-backed mutual-exclusion lock keyed by channel name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::ident::ChannelMangler;
use crate::transport::{AcquireOutcome, PgTransport};

use super::{roster, Lock};

/// A single channel's acquire/release state, backed by one row in the lock
/// table. Re-acquires itself on a timer so a process that lost the lock on
/// a transient contention can win it back once the previous owner's
/// connection dies.
pub struct ChannelLock {
    channel: String,
    mangled_channel: String,
    schema: String,
    acquire_interval: Duration,
    transport: Arc<dyn PgTransport>,
    acquired: AtomicBool,
    handler: Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    self_ref: Mutex<Weak<ChannelLock>>,
}

impl ChannelLock {
    /// Construct a new lock for `channel`, namespaced under `tag` within
    /// `schema`. Returned as an `Arc` because the periodic re-acquire timer
    /// holds a weak reference back to its own lock.
    pub fn new(
        channel: impl Into<String>,
        transport: Arc<dyn PgTransport>,
        tag: &str,
        schema: impl Into<String>,
        acquire_interval: Duration,
    ) -> Arc<Self> {
        let channel = channel.into();
        let mangled_channel = ChannelMangler::new(tag).mangle(&channel);

        let lock = Arc::new(Self {
            channel,
            mangled_channel,
            schema: schema.into(),
            acquire_interval,
            transport,
            acquired: AtomicBool::new(false),
            handler: Mutex::new(None),
            timer: Mutex::new(None),
            self_ref: Mutex::new(Weak::new()),
        });
        *lock.self_ref.lock().unwrap() = Arc::downgrade(&lock);
        lock
    }

    fn arm_timer(&self) {
        let mut timer_guard = self.timer.lock().unwrap();
        if timer_guard.is_some() {
            return;
        }
        let weak = self.self_ref.lock().unwrap().clone();
        let interval_dur = self.acquire_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_dur);
            interval.tick().await; // the first tick fires immediately; consume it
            loop {
                interval.tick().await;
                let Some(lock) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = lock.acquire().await {
                    tracing::warn!(channel = %lock.channel, error = %err, "periodic lock re-acquire failed");
                }
            }
        });
        *timer_guard = Some(handle);
    }
}

#[async_trait]
impl Lock for ChannelLock {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn init(&self) -> Result<()> {
        self.transport.bootstrap_lock_schema(&self.schema).await?;
        self.transport.listen(&self.mangled_channel).await?;

        if let Some(strong) = self.self_ref.lock().unwrap().upgrade() {
            roster::register(&(strong as Arc<dyn Lock>));
        }
        self.arm_timer();
        Ok(())
    }

    async fn acquire(&self) -> Result<bool> {
        let app = self.transport.application_name().to_string();
        match self
            .transport
            .try_acquire_lock(&self.schema, &self.mangled_channel, &app)
            .await
        {
            Ok(AcquireOutcome::Acquired) => {
                self.acquired.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Ok(AcquireOutcome::Locked) => {
                self.acquired.store(false, Ordering::SeqCst);
                Ok(false)
            }
            Err(err) => {
                tracing::warn!(channel = %self.channel, error = %err, "lock acquisition failed");
                self.acquired.store(false, Ordering::SeqCst);
                Ok(false)
            }
        }
    }

    async fn release(&self) -> Result<()> {
        if !self.acquired.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.transport
            .release_lock(&self.schema, &self.mangled_channel)
            .await?;
        self.acquired.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::SeqCst)
    }

    fn on_release(&self, handler: Box<dyn Fn(&str) + Send + Sync>) -> Result<()> {
        let mut guard = self.handler.lock().unwrap();
        if guard.is_some() {
            return Err(crate::error::Error::HandlerAlreadyInstalled);
        }
        *guard = Some(handler);
        Ok(())
    }

    fn notify_released(&self) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler(&self.channel);
        }
    }

    async fn destroy(&self) -> bool {
        self.handler.lock().unwrap().take();
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }

        let unlistened = self
            .transport
            .unlisten(&self.mangled_channel)
            .await
            .map_err(|err| {
                tracing::warn!(channel = %self.channel, error = %err, "failed to UNLISTEN during destroy");
            })
            .is_ok();
        let released = self
            .release()
            .await
            .map_err(|err| {
                tracing::warn!(channel = %self.channel, error = %err, "failed to release lock during destroy");
            })
            .is_ok();

        if let Some(strong) = self.self_ref.lock().unwrap().upgrade() {
            roster::deregister(&(strong as Arc<dyn Lock>));
        }

        unlistened && released
    }
}
