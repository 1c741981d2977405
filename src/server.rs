//! Embedded engine and wire-server collaborator.
//!
//! [`EmbeddedServer`] owns one engine installation, the storage backing it,
//! and (once listening) the wire server speaking the PostgreSQL protocol on
//! a bound port. It implements [`PortListener`] so the port state machine
//! can drive it without knowing anything about the engine.

use std::net::TcpListener;

use color_eyre::eyre::{WrapErr, eyre};
use postgresql_embedded::{PostgreSQL, Settings};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{InstanceError, ListenError, ListenResult, Result};
use crate::observability::LOG_TARGET;
use crate::port::PortListener;

/// Superuser account provisioned for every instance.
const SUPERUSER: &str = "postgres";
/// Password assigned to the superuser account.
const PASSWORD: &str = "postgres";

/// Verbosity of the wire server's log output.
///
/// Maps onto the engine's `log_min_messages` setting. Defaults to
/// [`LogLevel::Error`] so test output stays quiet unless asked otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Log errors only (the default).
    #[default]
    Error,
    /// Also log warnings.
    Warning,
    /// Also log informational messages.
    Info,
    /// Log debug-level detail.
    Debug,
}

impl LogLevel {
    /// Returns the matching `log_min_messages` severity.
    pub(crate) const fn min_messages(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug1",
        }
    }
}

/// One embedded engine plus its wire server and storage.
///
/// [`EmbeddedServer::prepare`] readies the engine (binary installation and
/// cluster initialisation); [`PortListener::listen`] starts the wire server
/// on a port; dropping the value releases the instance's storage.
#[derive(Debug)]
pub(crate) struct EmbeddedServer {
    settings: Settings,
    server: Option<PostgreSQL>,
    /// Storage for the engine's data files; removed on drop.
    _data_dir: TempDir,
}

impl EmbeddedServer {
    /// Constructs the engine and awaits its readiness signal.
    ///
    /// Readiness covers binary installation and cluster initialisation into
    /// a private data directory. The wait is unbounded; the engine contract
    /// guarantees eventual readiness or its own failure.
    pub(crate) async fn prepare(log_level: LogLevel) -> Result<Self> {
        let data_dir = tempfile::tempdir()
            .wrap_err("failed to create a data directory for the embedded engine")
            .map_err(InstanceError::Engine)?;

        let mut settings = Settings::default();
        settings.host = "localhost".to_owned();
        settings.username = SUPERUSER.to_owned();
        settings.password = PASSWORD.to_owned();
        settings.data_dir = data_dir.path().to_path_buf();
        settings.temporary = false;
        settings.timeout = None;
        settings
            .configuration
            .insert("log_min_messages".to_owned(), log_level.min_messages().to_owned());

        let mut engine = PostgreSQL::new(settings.clone());
        engine
            .setup()
            .await
            .wrap_err("embedded engine failed to become ready")
            .map_err(InstanceError::Engine)?;
        debug!(
            target: LOG_TARGET,
            data_dir = %settings.data_dir.display(),
            "embedded engine ready"
        );

        Ok(Self {
            settings,
            server: None,
            _data_dir: data_dir,
        })
    }

    /// Stops the wire server if it is listening.
    ///
    /// Storage release happens when the value drops, regardless of the stop
    /// outcome.
    pub(crate) async fn close(&mut self) -> Result<()> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };
        server
            .stop()
            .await
            .wrap_err("failed to stop the wire server")
            .map_err(InstanceError::Teardown)
    }

    /// Best-effort shutdown for failed provisioning paths.
    pub(crate) async fn abort(&mut self) {
        if let Err(err) = self.close().await {
            warn!(
                target: LOG_TARGET,
                error = %err,
                "failed to stop the wire server while unwinding a failed provision"
            );
        }
    }
}

impl PortListener for EmbeddedServer {
    async fn listen(&mut self, port: u16) -> ListenResult<u16> {
        let candidate = if port == 0 { ephemeral_candidate()? } else { port };

        let mut settings = self.settings.clone();
        settings.port = candidate;
        let mut server = PostgreSQL::new(settings);
        server
            .setup()
            .await
            .wrap_err("engine revalidation before listen failed")
            .map_err(ListenError::Fatal)?;

        match server.start().await {
            Ok(()) => {
                self.server = Some(server);
                debug!(target: LOG_TARGET, port = candidate, "wire server listening");
                Ok(candidate)
            }
            Err(err) if port == 0 && port_contended(candidate) => {
                Err(ListenError::Conflict(eyre!(err).wrap_err(format!(
                    "candidate port {candidate} was taken before the server bound it"
                ))))
            }
            Err(err) => Err(ListenError::Fatal(eyre!(err).wrap_err(format!(
                "wire server failed to start on port {candidate}"
            )))),
        }
    }
}

/// Asks the OS for a free ephemeral port by binding to port 0 and reading
/// the assignment back.
///
/// The probe socket is released before returning, so the caller may still
/// lose the race for the port; `listen` classifies that loss as a retryable
/// conflict. A placeholder read-back of 0 violates the bind contract and is
/// fatal, never retried.
fn ephemeral_candidate() -> ListenResult<u16> {
    let probe = TcpListener::bind(("127.0.0.1", 0))
        .wrap_err("failed to probe for an ephemeral port")
        .map_err(ListenError::Fatal)?;
    let port = probe
        .local_addr()
        .wrap_err("failed to read the probe socket's address")
        .map_err(ListenError::Fatal)?
        .port();
    if port == 0 {
        return Err(ListenError::Fatal(eyre!(
            "ephemeral port probe returned the placeholder port 0"
        )));
    }
    Ok(port)
}

/// Reports whether `port` is currently bound by another socket.
fn port_contended(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_err()
}
