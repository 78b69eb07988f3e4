//! Scoped log capture.
//!
//! Outside debug mode each node's setup pipeline runs with a dedicated
//! subscriber that writes into the node's [`OutputBuffer`]. The subscriber is
//! attached to the future itself, so it is detached whenever the future
//! finishes, fails, or is dropped.

use cluster_types::OutputBuffer;
use std::future::Future;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::Dispatch;

/// A subscriber that formats events as plain text into `buffer`.
pub fn capture_subscriber(buffer: OutputBuffer) -> Dispatch {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || buffer.clone())
        .with_ansi(false)
        .with_target(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    Dispatch::new(subscriber)
}

/// Run `fut` with its log output redirected into `buffer`.
///
/// With no buffer the future keeps the caller's subscriber.
pub fn scoped<F: Future>(fut: F, buffer: Option<OutputBuffer>) -> WithDispatch<F> {
    match buffer {
        Some(buffer) => fut.with_subscriber(capture_subscriber(buffer)),
        None => fut.with_current_subscriber(),
    }
}
