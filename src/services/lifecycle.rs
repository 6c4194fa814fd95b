use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::workers::PipelineError;

/// Start-up and tear-down hooks for heavy collaborators (OCR engines,
/// detectors). Both default to no-ops.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Owns one collaborator, initializes it on first use exactly once, and
/// shuts it down explicitly when the owning worker stops.
pub struct ManagedEngine<E: ?Sized> {
    engine: Arc<E>,
    ready: OnceCell<()>,
}

impl<E: Lifecycle + ?Sized> ManagedEngine<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            ready: OnceCell::new(),
        }
    }

    /// The engine, initializing it first if this is the first call.
    pub async fn acquire(&self) -> Result<&E, PipelineError> {
        self.ready
            .get_or_try_init(|| async {
                tracing::info!(engine = %self.engine.name(), "Initializing engine");
                self.engine.initialize().await
            })
            .await?;
        Ok(self.engine.as_ref())
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    /// Shut the engine down if it was ever initialized.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        if !self.is_initialized() {
            return Ok(());
        }
        tracing::info!(engine = %self.engine.name(), "Shutting down engine");
        self.engine.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl Lifecycle for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn initialize(&self) -> Result<(), PipelineError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), PipelineError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initializes_once() {
        let engine = Arc::new(Counting::default());
        let managed = ManagedEngine::new(engine.clone());
        managed.acquire().await.unwrap();
        managed.acquire().await.unwrap();
        assert_eq!(engine.inits.load(Ordering::SeqCst), 1);

        managed.shutdown().await.unwrap();
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_use_is_noop() {
        let engine = Arc::new(Counting::default());
        ManagedEngine::new(engine.clone()).shutdown().await.unwrap();
        assert_eq!(engine.shutdowns.load(Ordering::SeqCst), 0);
    }
}
