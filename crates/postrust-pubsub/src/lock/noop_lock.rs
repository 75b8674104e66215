//! The trivial [`Lock`] used when `single_listener` is disabled: every
//! process is always "acquired" and release notifications are never
//! expected, since there is no shared row to contend over.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::Lock;

pub struct NoOpLock {
    channel: String,
    handler_installed: AtomicBool,
}

impl NoOpLock {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            handler_installed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Lock for NoOpLock {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn acquire(&self) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }

    fn is_acquired(&self) -> bool {
        true
    }

    fn on_release(&self, _handler: Box<dyn Fn(&str) + Send + Sync>) -> Result<()> {
        if self.handler_installed.swap(true, Ordering::SeqCst) {
            return Err(Error::HandlerAlreadyInstalled);
        }
        Ok(())
    }

    fn notify_released(&self) {}

    async fn destroy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_acquired() {
        let lock = NoOpLock::new("orders");
        assert!(lock.is_acquired());
        lock.init().await.unwrap();
        assert!(lock.acquire().await.unwrap());
        lock.release().await.unwrap();
        assert!(lock.is_acquired());
    }

    #[test]
    fn test_channel_name() {
        let lock = NoOpLock::new("orders");
        assert_eq!(lock.channel(), "orders");
    }

    #[test]
    fn test_on_release_rejects_second_handler() {
        let lock = NoOpLock::new("orders");
        lock.on_release(Box::new(|_| {})).unwrap();
        assert!(matches!(
            lock.on_release(Box::new(|_| {})),
            Err(Error::HandlerAlreadyInstalled)
        ));
    }
}
