//! Production implementation of ArcherContext using Tokio.

use crate::ArcherContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// Production context backed by the Tokio clock.
///
/// Uses `tokio::time::Instant`, so tests running with a paused clock see
/// sleeps and elapsed time advance together.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArcherContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("task", name = %name);
        tokio::spawn(future.instrument(span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_follows_paused_clock() {
        let ctx = TokioContext::new();
        ctx.sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.now().as_secs(), 3);
    }

    #[tokio::test]
    async fn test_tokio_context_spawn_runs_task() {
        let ctx = TokioContext::shared();
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.spawn("probe", async move {
            let _ = tx.send(42u32);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }
}
