//! The inter-process mutual-exclusion primitive keyed by channel name.

pub mod channel_lock;
pub mod noop_lock;
pub mod roster;
pub mod schema;

pub use channel_lock::ChannelLock;
pub use noop_lock::NoOpLock;

use async_trait::async_trait;

use crate::error::Result;

/// Capability set shared by [`ChannelLock`] and [`NoOpLock`], selected at
/// facade construction based on `single_listener`.
#[async_trait]
pub trait Lock: Send + Sync {
    /// The user-visible channel name this lock guards.
    fn channel(&self) -> &str;

    /// Bootstrap schema if necessary, subscribe to the internal release
    /// channel, register in the process-wide roster, arm the re-acquire
    /// timer. Safe to call more than once (idempotent re-init).
    async fn init(&self) -> Result<()>;

    /// Attempt to acquire the lock. Never propagates a database error to
    /// the caller: contention and unexpected failures both resolve to
    /// `Ok(false)`, with the latter logged.
    async fn acquire(&self) -> Result<bool>;

    /// Release the lock. No-op if not currently acquired.
    async fn release(&self) -> Result<()>;

    /// Whether this process currently holds the lock.
    fn is_acquired(&self) -> bool;

    /// Install the single release-notification handler. Fails if one is
    /// already installed.
    fn on_release(&self, handler: Box<dyn Fn(&str) + Send + Sync>) -> Result<()>;

    /// Invoked by the notification demultiplexer when a release
    /// notification arrives on this lock's internal channel.
    fn notify_released(&self);

    /// Detach handlers, cancel the timer, unsubscribe, release the row,
    /// deregister from the roster. Returns `false` if any step along the
    /// way failed (already logged by that step); the lock is considered
    /// destroyed either way.
    async fn destroy(&self) -> bool;
}
