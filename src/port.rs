//! Bounded ephemeral-port acquisition for wire servers.
//!
//! Port selection is delegated to the OS: each attempt asks for port 0 and
//! reads back the concrete assignment, so interleaved provisioning calls
//! never coordinate through shared state. The OS bind table is the sole
//! source of truth on occupancy; correctness relies on bind-time conflict
//! detection, not pre-reservation.

use tracing::debug;

use crate::error::{InstanceError, ListenError, ListenResult, Result};
use crate::observability::LOG_TARGET;

/// Default retry budget for ephemeral bind attempts.
pub(crate) const DEFAULT_BIND_ATTEMPTS: u32 = 5;

/// A server that can be asked to listen on a port.
///
/// Passing `0` requests an OS-assigned ephemeral port; the implementation
/// reports back the port it actually bound.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait PortListener {
    /// Binds the server to `port`, returning the concrete bound port.
    async fn listen(&mut self, port: u16) -> ListenResult<u16>;
}

/// Binds `listener` to a free ephemeral port, retrying lost bind races.
///
/// Each conflict consumes one attempt and requests a fresh OS-assigned
/// candidate; any other failure terminates immediately. An exhausted budget
/// is a terminal provisioning failure, never an infinite loop.
pub(crate) async fn acquire_port<L: PortListener>(listener: &mut L, attempts: u32) -> Result<u16> {
    let mut remaining = attempts;
    while remaining > 0 {
        match listener.listen(0).await {
            Ok(port) => return Ok(port),
            Err(ListenError::Conflict(report)) => {
                remaining -= 1;
                debug!(
                    target: LOG_TARGET,
                    remaining,
                    error = %report,
                    "bind conflict; retrying on a fresh ephemeral port"
                );
            }
            Err(ListenError::Fatal(report)) => return Err(InstanceError::Listen(report)),
        }
    }
    Err(InstanceError::PortsExhausted { attempts })
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::{Result, ensure, eyre};
    use mockall::Sequence;
    use mockall::predicate::eq;

    use super::*;

    fn conflict() -> ListenError {
        ListenError::Conflict(eyre!("address already in use"))
    }

    #[tokio::test]
    async fn resolves_with_the_bound_port_on_first_success() -> Result<()> {
        let mut listener = MockPortListener::new();
        listener
            .expect_listen()
            .with(eq(0))
            .times(1)
            .returning(|_| Ok(54_321));

        let port = acquire_port(&mut listener, DEFAULT_BIND_ATTEMPTS).await?;
        ensure!(port == 54_321, "should report the port the listener bound");
        Ok(())
    }

    #[tokio::test]
    async fn retries_conflicts_with_fresh_candidates() -> Result<()> {
        let mut listener = MockPortListener::new();
        let mut seq = Sequence::new();
        listener
            .expect_listen()
            .with(eq(0))
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(conflict()));
        listener
            .expect_listen()
            .with(eq(0))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(6_000));

        let port = acquire_port(&mut listener, DEFAULT_BIND_ATTEMPTS).await?;
        ensure!(port == 6_000, "should succeed once a bind attempt wins");
        Ok(())
    }

    #[tokio::test]
    async fn exhausting_the_budget_is_terminal() -> Result<()> {
        let mut listener = MockPortListener::new();
        listener
            .expect_listen()
            .with(eq(0))
            .times(3)
            .returning(|_| Err(conflict()));

        let err = match acquire_port(&mut listener, 3).await {
            Ok(port) => return Err(eyre!("unexpected success on port {port}")),
            Err(err) => err,
        };
        ensure!(
            matches!(err, InstanceError::PortsExhausted { attempts: 3 }),
            "exhaustion should name the spent budget, got: {err}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn fatal_errors_short_circuit() -> Result<()> {
        let mut listener = MockPortListener::new();
        listener
            .expect_listen()
            .with(eq(0))
            .times(1)
            .returning(|_| Err(ListenError::Fatal(eyre!("probe returned port 0"))));

        let err = match acquire_port(&mut listener, DEFAULT_BIND_ATTEMPTS).await {
            Ok(port) => return Err(eyre!("unexpected success on port {port}")),
            Err(err) => err,
        };
        ensure!(
            matches!(err, InstanceError::Listen(_)),
            "fatal listen failures must not be retried, got: {err}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn zero_budget_never_attempts_a_bind() -> Result<()> {
        let mut listener = MockPortListener::new();
        listener.expect_listen().times(0);

        let err = match acquire_port(&mut listener, 0).await {
            Ok(port) => return Err(eyre!("unexpected success on port {port}")),
            Err(err) => err,
        };
        ensure!(
            matches!(err, InstanceError::PortsExhausted { attempts: 0 }),
            "an empty budget should fail without touching the listener"
        );
        Ok(())
    }
}
