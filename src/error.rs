//! Domain error types for instance provisioning and teardown.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return an [`InstanceError`].
pub type Result<T> = std::result::Result<T, InstanceError>;

/// Result alias for listen attempts inside the port state machine.
pub(crate) type ListenResult<T> = std::result::Result<T, ListenError>;

/// Failures surfaced while provisioning or tearing down an instance.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// The embedded engine could not be installed, initialised, or readied.
    #[error("embedded engine setup failed: {0}")]
    Engine(Report),
    /// The wire server failed to bind or start listening.
    #[error("wire server failed to listen: {0}")]
    Listen(Report),
    /// Every bind attempt in the budget lost a port race.
    #[error("no free port after {attempts} bind attempts")]
    PortsExhausted {
        /// Size of the retry budget that was exhausted.
        attempts: u32,
    },
    /// Building the client pool from the connection string failed.
    #[error("client pool configuration failed: {0}")]
    Pool(Report),
    /// Releasing an instance's resources failed.
    #[error("instance teardown failed: {0}")]
    Teardown(Report),
}

/// Classifies a failed listen attempt for the retry state machine.
///
/// Only a lost bind race is retryable; everything else, including an
/// unusable probe address, terminates acquisition immediately.
#[derive(Debug)]
pub(crate) enum ListenError {
    /// Another process or instance won the bind race for the candidate port.
    Conflict(Report),
    /// Any other listen failure; never retried.
    Fatal(Report),
}

impl ListenError {
    /// Extracts the underlying diagnostic report.
    pub(crate) fn into_report(self) -> Report {
        match self {
            Self::Conflict(report) | Self::Fatal(report) => report,
        }
    }

    /// Converts the failure into the caller-facing listen error.
    pub(crate) fn into_instance_error(self) -> InstanceError {
        InstanceError::Listen(self.into_report())
    }
}
