//! Process-wide roster of live channel locks, used by the shutdown
//! coordinator to release every held lock on signal.
//!
//! A `Mutex<Vec<Weak<dyn Lock>>>` rather than a `Vec<Arc<dyn Lock>>`: the
//! roster must not be the thing keeping a lock alive after its owning
//! pub/sub instance has dropped it.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use super::Lock;

type Roster = Mutex<Vec<Weak<dyn Lock>>>;

static ROSTER: OnceLock<Roster> = OnceLock::new();

fn roster() -> &'static Roster {
    ROSTER.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a lock in the process-wide roster. Safe to call more than
/// once for the same lock (re-init after `destroy()`); duplicates are not
/// added.
pub fn register(lock: &Arc<dyn Lock>) {
    let mut guard = roster().lock().unwrap();
    guard.retain(|weak| weak.strong_count() > 0);

    let already_present = guard.iter().any(|weak| {
        weak.upgrade()
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(&existing), Arc::as_ptr(lock)))
    });
    if !already_present {
        guard.push(Arc::downgrade(lock));
    }
}

/// Remove a lock from the roster (called from `destroy()`).
pub fn deregister(lock: &Arc<dyn Lock>) {
    let mut guard = roster().lock().unwrap();
    guard.retain(|weak| {
        weak.upgrade()
            .is_some_and(|existing| !std::ptr::eq(Arc::as_ptr(&existing), Arc::as_ptr(lock)))
    });
}

/// Every lock currently registered and still alive.
pub fn live_locks() -> Vec<Arc<dyn Lock>> {
    let mut guard = roster().lock().unwrap();
    guard.retain(|weak| weak.strong_count() > 0);
    guard.iter().filter_map(|weak| weak.upgrade()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubLock {
        channel: String,
    }

    #[async_trait]
    impl Lock for StubLock {
        fn channel(&self) -> &str {
            &self.channel
        }
        async fn init(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn acquire(&self) -> crate::error::Result<bool> {
            Ok(true)
        }
        async fn release(&self) -> crate::error::Result<()> {
            Ok(())
        }
        fn is_acquired(&self) -> bool {
            true
        }
        fn on_release(&self, _handler: Box<dyn Fn(&str) + Send + Sync>) -> crate::error::Result<()> {
            Ok(())
        }
        fn notify_released(&self) {}
        async fn destroy(&self) -> bool {
            true
        }
    }

    fn stub(channel: &str) -> Arc<dyn Lock> {
        Arc::new(StubLock {
            channel: channel.to_string(),
        }) as Arc<dyn Lock>
    }

    fn contains(locks: &[Arc<dyn Lock>], target: &Arc<dyn Lock>) -> bool {
        locks
            .iter()
            .any(|l| std::ptr::eq(Arc::as_ptr(l), Arc::as_ptr(target)))
    }

    // The roster is a single process-wide static, also touched by
    // `ChannelLock`'s own tests, so these assertions check membership of a
    // specific `Arc` by pointer rather than total roster length — the
    // latter would race against whatever else is registering concurrently.

    #[test]
    fn test_register_is_dedup_safe() {
        let lock = stub("a");
        register(&lock);
        register(&lock);
        let snapshot = live_locks();
        assert_eq!(snapshot.iter().filter(|l| contains(&[lock.clone()], l)).count(), 1);
        deregister(&lock);
        assert!(!contains(&live_locks(), &lock));
    }

    #[test]
    fn test_dropped_lock_is_pruned_on_next_call() {
        let weak = {
            let lock = stub("b");
            register(&lock);
            assert!(contains(&live_locks(), &lock));
            Arc::downgrade(&lock)
        };
        // `lock` has dropped; the weak entry is pruned on the next roster access.
        let _ = live_locks();
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_deregister_only_removes_named_lock() {
        let a = stub("a");
        let b = stub("b");
        register(&a);
        register(&b);
        deregister(&a);
        assert!(!contains(&live_locks(), &a));
        assert!(contains(&live_locks(), &b));
        deregister(&b);
        assert!(!contains(&live_locks(), &b));
    }
}
