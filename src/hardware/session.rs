//! Scoped instrument connections.

use crate::hardware::capabilities::Connection;
use anyhow::Result;
use std::future::Future;
use tracing::{error, info};

/// Open `device`, run `body`, then close `device`.
///
/// The close runs whether or not `body` succeeded. When both fail, the close
/// error is logged and the body error is returned. When opening fails the body
/// never runs and no close is attempted.
///
/// ```rust,ignore
/// let current = scoped(testbed.laser(), || async {
///     laser.set_current(1, 50.0).await?;
///     laser.get_current(1).await
/// })
/// .await?;
/// ```
pub async fn scoped<D, F, Fut, T>(device: &D, body: F) -> Result<T>
where
    D: Connection + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    device.open().await?;
    info!(instrument = device.id(), "Opened connection");

    let outcome = body().await;
    let closed = device.close().await;

    match (outcome, closed) {
        (Ok(value), Ok(())) => {
            info!(instrument = device.id(), "Safely closed connection");
            Ok(value)
        }
        (Ok(_), Err(close_err)) => Err(close_err.context(format!(
            "Failed to close connection to {}",
            device.id()
        ))),
        (Err(body_err), Ok(())) => {
            info!(instrument = device.id(), "Safely closed connection after error");
            Err(body_err)
        }
        (Err(body_err), Err(close_err)) => {
            error!(
                instrument = device.id(),
                error = %close_err,
                "Close failed while handling an earlier error"
            );
            Err(body_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing_test::traced_test;

    #[derive(Default)]
    struct CountingDevice {
        opened: AtomicUsize,
        closed: AtomicUsize,
        fail_open: AtomicBool,
        fail_close: AtomicBool,
    }

    #[async_trait]
    impl Connection for CountingDevice {
        fn id(&self) -> &str {
            "counting_device"
        }

        async fn open(&self) -> Result<()> {
            if self.fail_open.load(Ordering::SeqCst) {
                anyhow::bail!("open refused");
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close.load(Ordering::SeqCst) {
                anyhow::bail!("close refused");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn closes_after_success() {
        let device = CountingDevice::default();
        let value = scoped(&device, || async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(device.opened.load(Ordering::SeqCst), 1);
        assert_eq!(device.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closes_after_body_error() {
        let device = CountingDevice::default();
        let err = scoped(&device, || async { Err::<(), _>(anyhow::anyhow!("body failed")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "body failed");
        assert_eq!(device.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn body_error_wins_over_close_error() {
        let device = CountingDevice::default();
        device.fail_close.store(true, Ordering::SeqCst);
        let err = scoped(&device, || async { Err::<(), _>(anyhow::anyhow!("body failed")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "body failed");
        assert!(logs_contain("Close failed while handling an earlier error"));
    }

    #[tokio::test]
    async fn open_failure_skips_body_and_close() {
        let device = CountingDevice::default();
        device.fail_open.store(true, Ordering::SeqCst);
        let ran = AtomicBool::new(false);
        let result = scoped(&device, || async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(result.is_err());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(device.closed.load(Ordering::SeqCst), 0);
    }
}
