//! Opt-in process-signal hook that releases every live channel lock within
//! a grace window, mirroring the `shutdown_signal()` helper pattern used
//! to wire `ctrl_c`/`SIGTERM` into a graceful-stop future.

use std::time::Duration;

use crate::lock::roster;

/// Installs a `SIGINT`/`SIGTERM` handler that, once triggered, calls
/// `destroy()` on every currently-registered lock and exits the process.
///
/// Not wired automatically on crate load: a library consumer embedding
/// this pub/sub client inside a larger service with its own shutdown
/// plumbing (an axum server, say) should not be forced into a second
/// signal handler.
pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    /// Spawn the signal-waiting task. Returns immediately; the process
    /// exits from within the spawned task once a signal arrives.
    pub fn install(timeout: Duration) {
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received, releasing live locks");

            let exit_code = match tokio::time::timeout(timeout, release_all_locks()).await {
                Ok(true) => 0,
                Ok(false) => {
                    tracing::warn!("one or more locks failed to release cleanly");
                    1
                }
                Err(_) => {
                    tracing::warn!(timeout_ms = %timeout.as_millis(), "shutdown grace window elapsed before all locks released");
                    1
                }
            };

            std::process::exit(exit_code);
        });
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Releases every live lock in the process-wide roster. Returns `true` only
/// if every lock reported a clean release; a lock whose `UNLISTEN` or
/// `DELETE` failed (already logged by `Lock::destroy`) makes this `false`.
async fn release_all_locks() -> bool {
    let locks = roster::live_locks();
    let mut all_clean = true;
    for lock in locks {
        if !lock.destroy().await {
            all_clean = false;
        }
    }
    all_clean
}
