//! The wireless capability a session needs from the Bluetooth stack.
//!
//! [`crate::ble::BluestLink`] implements it on top of `bluest`; tests use an
//! in-memory link.

use std::future::Future;

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::Uuid;
use futures_util::stream::BoxStream;
use log::warn;
use tokio::time::{timeout_at, Duration, Instant};

/// Notification payloads for one subscribed characteristic, in arrival order
pub type Notifications<'a> = BoxStream<'a, anyhow::Result<Vec<u8>>>;

/// Opens connections to devices identified by their hardware address.
#[async_trait]
pub trait Link: Send + Sync {
    type Connection: Connection;

    /// Connect to the device with the given address, giving up after `timeout`.
    ///
    /// On any failure, including running out of time, nothing may be left
    /// connected: the caller only disconnects connections it was handed.
    async fn connect(&self, address: &str, timeout: Duration) -> anyhow::Result<Self::Connection>;
}

/// An open connection to a single device.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write `payload` to a characteristic, optionally waiting for the device
    /// to acknowledge it.
    async fn write(&self, characteristic: Uuid, payload: &[u8], with_response: bool) -> anyhow::Result<()>;

    /// Subscribe to notifications from a characteristic.
    ///
    /// The stream may yield any number of payloads, including none.
    async fn subscribe(&self, characteristic: Uuid) -> anyhow::Result<Notifications<'_>>;

    async fn unsubscribe(&self, characteristic: Uuid) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;
}

/// Run `setup` on an already connected device, calling `undo` if it fails or
/// has not finished by `deadline`.
pub(crate) async fn set_up_or_undo<T, S, U, F>(deadline: Instant, address: &str, setup: S, undo: U) -> anyhow::Result<T>
where
    S: Future<Output = anyhow::Result<T>>,
    U: FnOnce() -> F,
    F: Future<Output = anyhow::Result<()>>,
{
    let err = match timeout_at(deadline, setup).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err,
        Err(_) => anyhow!("Timed out connecting"),
    };

    if let Err(undo_err) = undo().await {
        warn!("{address}: failed to disconnect: {undo_err}");
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDRESS: &str = "50:54:7B:24:36:A2";

    #[tokio::test(start_paused = true)]
    async fn finished_setup_is_kept() {
        let undone = AtomicUsize::new(0);
        let deadline = Instant::now() + Duration::from_secs(30);

        let result = set_up_or_undo(deadline, ADDRESS, async { Ok(7) }, || async {
            undone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(undone.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_setup_is_undone() {
        let undone = AtomicUsize::new(0);
        let deadline = Instant::now() + Duration::from_secs(30);

        let result: anyhow::Result<()> = set_up_or_undo(
            deadline,
            ADDRESS,
            async { Err(anyhow!("The specified device does not support the BM6 service.")) },
            || async {
                undone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(result.unwrap_err().to_string(), "The specified device does not support the BM6 service.");
        assert_eq!(undone.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn setup_still_running_at_deadline_is_undone() {
        let undone = AtomicUsize::new(0);
        let started = Instant::now();
        let deadline = started + Duration::from_secs(30);

        let result: anyhow::Result<()> = set_up_or_undo(deadline, ADDRESS, std::future::pending(), || async {
            undone.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("not connected"))
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "Timed out connecting");
        assert_eq!(undone.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
