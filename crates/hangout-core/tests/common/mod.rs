//! Shared helpers for integration tests

#![allow(dead_code)]

use std::time::Duration;

/// Install the crate's test subscriber once; later calls are no-ops
pub fn init_tracing() {
    hangout_core::logging::init_for_tests();
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
