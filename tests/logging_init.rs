//! Installs the process-global subscriber, so it runs in its own test binary

use kestrel::logging::init_tracing;

#[test]
fn test_init_tracing_installs_once() {
    assert!(init_tracing(true).is_ok());
    assert!(init_tracing(false).is_err());
    tracing::info!(target: "kestrel", "subscriber active");
}
