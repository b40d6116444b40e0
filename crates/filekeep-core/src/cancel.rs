//! Cooperative cancellation for async file and network operations.
//!
//! Built on a `tokio::sync::watch` channel: the source flips the flag once,
//! every token clone observes it.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{FileError, Result};

/// Owning side of a cancellation signal.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Cheap, cloneable observer of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal cancellation to every token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail with `Cancelled` if the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FileError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is signalled. Pends forever if the source is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|&v| v).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Race `fut` against cancellation.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(FileError::Cancelled),
            out = fut => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_token_observes_cancel() {
        let source = CancelSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        source.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(FileError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_cancelled_when_signalled() {
        let source = CancelSource::new();
        let token = source.token();

        let handle = tokio::spawn(async move {
            token
                .run(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, FileError>(42)
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(FileError::Cancelled)));
    }

    #[tokio::test]
    async fn test_none_token_completes_work() {
        let token = CancelToken::none();
        let value = token.run(async { Ok::<_, FileError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
