//! Short-lived, isolated embedded PostgreSQL instances for automated tests.
//!
//! Each [`provision`] call boots an independent engine, binds its wire
//! server to a free port, and returns a handle bundling a lazy `sqlx` pool,
//! the connection string, and a single teardown operation. Port selection
//! is delegated to the OS (bind to port 0 and read the assignment back)
//! under a bounded retry budget, so concurrently provisioned instances
//! never coordinate through shared state.
//!
//! [`with_instance`] scopes an instance to a callback and guarantees
//! teardown runs afterwards, whether the callback succeeds or fails.
//!
//! ```no_run
//! use pg_embedded_pool::with_instance;
//!
//! # async fn demo() -> color_eyre::Result<()> {
//! let value: i32 = with_instance(async |pg| {
//!     let row: (i32,) = sqlx::query_as("SELECT 1 AS value")
//!         .fetch_one(pg.pool())
//!         .await?;
//!     Ok::<_, color_eyre::Report>(row.0)
//! })
//! .await?;
//! assert_eq!(value, 1);
//! # Ok(())
//! # }
//! ```

mod error;
mod instance;
mod observability;
mod port;
mod server;

pub use error::{InstanceError, Result};
pub use instance::{InstanceOptions, PgInstance, provision, with_instance, with_instance_opts};
pub use server::LogLevel;
