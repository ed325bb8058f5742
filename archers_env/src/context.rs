//! Core environment context trait for archers.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The interface to clocks and task spawning.
///
/// Relay and fire timing go through this trait so a line can run on the
/// real clock or on tokio's paused test clock.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`
#[async_trait]
pub trait ArcherContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// The shared start timestamp of a line is a value of this clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
