//! Shared helpers for integration tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a compact tracing subscriber once per test binary.
///
/// Later calls are no-ops; a subscriber installed elsewhere wins quietly.
pub fn init_tracing() {
    INIT.call_once(|| {
        drop(
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_test_writer()
                .try_init(),
        );
    });
}
