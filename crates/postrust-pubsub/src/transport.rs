//! The database driver as an external collaborator.
//!
//! The rest of this crate never talks to `tokio-postgres` directly — it
//! goes through [`PgTransport`]/[`PgConnector`]. That keeps the supervisor,
//! the lock and the facade exercisable against a fake in unit tests, and
//! keeps the Postgres wire protocol itself firmly out of scope: we reuse
//! `tokio-postgres`'s driver rather than reimplementing `LISTEN`/`NOTIFY`
//! framing.

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;

use crate::error::{Error, Result};

/// A notification delivered on a channel this connection is listening on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
    pub process_id: i32,
}

/// Outcome of an `INSERT ... ON CONFLICT DO UPDATE` lock acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The row is now owned by the requesting application name.
    Acquired,
    /// `deadlock_check` found the previous owner still alive; rejected.
    Locked,
}

/// A single persistent database connection, abstracted so the rest of the
/// crate can be driven by a fake in tests.
#[async_trait]
pub trait PgTransport: Send + Sync {
    /// The `application_name` this connection identified itself with.
    fn application_name(&self) -> &str;

    /// `LISTEN "<mangled_channel>"`.
    async fn listen(&self, mangled_channel: &str) -> Result<()>;

    /// `UNLISTEN "<mangled_channel>"`.
    async fn unlisten(&self, mangled_channel: &str) -> Result<()>;

    /// `UNLISTEN *`.
    async fn unlisten_all(&self) -> Result<()>;

    /// `NOTIFY "<mangled_channel>", '<payload_literal>'`. `payload_literal`
    /// is the already-escaped single-quoted literal.
    async fn notify(&self, mangled_channel: &str, payload_literal: &str) -> Result<()>;

    /// `SELECT pg_backend_pid()` — this connection's own server-side pid,
    /// used for self-notification filtering.
    async fn backend_pid(&self) -> Result<i32>;

    /// Idempotently create the lock schema (table, notify trigger,
    /// deadlock-check routine) described in the lock schema bootstrap.
    async fn bootstrap_lock_schema(&self, schema: &str) -> Result<()>;

    /// Attempt `INSERT ... ON CONFLICT (channel) DO UPDATE SET app =
    /// deadlock_check(lock.app, $app)` for `mangled_channel`.
    async fn try_acquire_lock(
        &self,
        schema: &str,
        mangled_channel: &str,
        app: &str,
    ) -> Result<AcquireOutcome>;

    /// `DELETE FROM lock WHERE channel = <mangled_channel>`.
    async fn release_lock(&self, schema: &str, mangled_channel: &str) -> Result<()>;

    /// Await the next notification on any channel this connection is
    /// listening on. Returns `None` once the connection has ended.
    async fn recv_notification(&self) -> Option<Notification>;

    /// End the connection. Best-effort; does not block on a clean
    /// backend-side shutdown.
    async fn end(&self);
}

/// Produces fresh [`PgTransport`]s, one per (re)connection attempt.
#[async_trait]
pub trait PgConnector: Send + Sync {
    async fn connect(&self, application_name: &str) -> Result<Box<dyn PgTransport>>;
}

/// [`PgConnector`] backed by a real `tokio-postgres` connection.
pub struct TokioPostgresConnector {
    base_config: tokio_postgres::Config,
}

impl TokioPostgresConnector {
    /// Parse a Postgres connection string (`postgresql://...` or keyword/value form).
    pub fn new(conn_str: &str) -> Result<Self> {
        let base_config: tokio_postgres::Config = conn_str
            .parse()
            .map_err(|err| Error::Config(format!("invalid connection string: {err}")))?;
        Ok(Self { base_config })
    }
}

#[async_trait]
impl PgConnector for TokioPostgresConnector {
    async fn connect(&self, application_name: &str) -> Result<Box<dyn PgTransport>> {
        let mut config = self.base_config.clone();
        config.application_name(application_name);

        let (client, mut connection) = config
            .connect(NoTls)
            .await
            .map_err(|err| Error::Connection(err.to_string()))?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            loop {
                match futures::future::poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(tokio_postgres::AsyncMessage::Notification(n))) => {
                        let _ = tx.send(Notification {
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                            process_id: n.process_id(),
                        });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "postgres connection driver ended with error");
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(Box::new(TokioPostgresTransport {
            client,
            application_name: application_name.to_string(),
            notifications: AsyncMutex::new(rx),
            driver,
        }))
    }
}

struct TokioPostgresTransport {
    client: tokio_postgres::Client,
    application_name: String,
    notifications: AsyncMutex<tokio::sync::mpsc::UnboundedReceiver<Notification>>,
    driver: JoinHandle<()>,
}

impl Drop for TokioPostgresTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl PgTransport for TokioPostgresTransport {
    fn application_name(&self) -> &str {
        &self.application_name
    }

    async fn listen(&self, mangled_channel: &str) -> Result<()> {
        let sql = format!("LISTEN {}", postrust_sql::escape_ident(mangled_channel));
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn unlisten(&self, mangled_channel: &str) -> Result<()> {
        let sql = format!("UNLISTEN {}", postrust_sql::escape_ident(mangled_channel));
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn unlisten_all(&self) -> Result<()> {
        self.client.batch_execute("UNLISTEN *").await?;
        Ok(())
    }

    async fn notify(&self, mangled_channel: &str, payload_literal: &str) -> Result<()> {
        let sql = format!(
            "NOTIFY {}, {}",
            postrust_sql::escape_ident(mangled_channel),
            payload_literal
        );
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn backend_pid(&self) -> Result<i32> {
        let row = self.client.query_one("SELECT pg_backend_pid()", &[]).await?;
        Ok(row.get(0))
    }

    async fn bootstrap_lock_schema(&self, schema: &str) -> Result<()> {
        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
                &[&schema],
            )
            .await?
            .get(0);
        if exists {
            return Ok(());
        }

        let sql = crate::lock::schema::bootstrap_sql(schema);
        if let Err(err) = self.client.batch_execute(&sql).await {
            // Tolerate a race between concurrent first-time initializers.
            tracing::debug!(error = %err, schema = %schema, "lock schema bootstrap raced with a concurrent initializer");
        }
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        schema: &str,
        mangled_channel: &str,
        app: &str,
    ) -> Result<AcquireOutcome> {
        let sql = crate::lock::schema::acquire_sql(schema, mangled_channel, app);
        match self.client.batch_execute(&sql).await {
            Ok(()) => Ok(AcquireOutcome::Acquired),
            Err(err) => {
                if is_locked_sentinel(&err) {
                    Ok(AcquireOutcome::Locked)
                } else {
                    Err(Error::Database(err))
                }
            }
        }
    }

    async fn release_lock(&self, schema: &str, mangled_channel: &str) -> Result<()> {
        let sql = crate::lock::schema::release_sql(schema, mangled_channel);
        self.client.batch_execute(&sql).await?;
        Ok(())
    }

    async fn recv_notification(&self) -> Option<Notification> {
        let mut rx = self.notifications.lock().await;
        rx.recv().await
    }

    async fn end(&self) {
        self.driver.abort();
    }
}

/// Whether a database error is the `deadlock_check` sentinel: `SQLSTATE
/// 'P0001'` with `DETAIL='LOCKED'`.
fn is_locked_sentinel(err: &tokio_postgres::Error) -> bool {
    err.as_db_error()
        .map(|db| {
            db.code() == &tokio_postgres::error::SqlState::RAISE_EXCEPTION
                && db.detail() == Some("LOCKED")
        })
        .unwrap_or(false)
}
