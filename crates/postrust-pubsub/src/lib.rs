//! Reliable publish/subscribe over PostgreSQL `LISTEN`/`NOTIFY`, with a
//! distributed single-listener guarantee: among many processes sharing one
//! database, at most one holds the "live listener" role per channel at any
//! instant, and a dead holder's channel is taken over automatically.

pub mod codec;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod ident;
pub mod lock;
pub mod pubsub;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::PubSubConfig;
pub use emitter::HandlerId;
pub use error::{Error, Result};
pub use event::PubSubEvent;
pub use pubsub::PubSub;
pub use shutdown::ShutdownCoordinator;
pub use transport::{PgConnector, TokioPostgresConnector};

/// Convenience re-exports for the common case of `use postrust_pubsub::prelude::*;`.
pub mod prelude {
    pub use crate::config::PubSubConfig;
    pub use crate::emitter::HandlerId;
    pub use crate::error::{Error, Result};
    pub use crate::event::PubSubEvent;
    pub use crate::pubsub::PubSub;
    pub use crate::transport::{PgConnector, TokioPostgresConnector};
}
