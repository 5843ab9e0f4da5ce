//! One connect, request, collect, disconnect exchange with a BM6 module.
//!
//! The module answers an encrypted request frame with a stream of encrypted
//! notifications, only some of which carry telemetry. Notifications are
//! merged into a [`TelemetryRecord`] until it is complete or the wait runs out.

use anyhow::anyhow;
use bluest::Uuid;
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::time::{sleep_until, timeout, timeout_at, Duration, Instant};

use crate::cipher::{Frame, FrameCipher};
use crate::link::{Connection, Link, Notifications};
use crate::telemetry::{parse_frame, TelemetryRecord};

/// A verbatim (plaintext) message to send which requests the current telemetry
pub const REQUEST: Frame = [0xd1, 0x55, 0x07, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// The BM6 GATT service (0xfff0)
pub const SERVICE_ID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);
/// The characteristic requests are written to (0xfff3)
pub const WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);
/// The characteristic telemetry is notified on (0xfff4)
pub const NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000fff4_0000_1000_8000_00805f9b34fb);

/// Timing of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on connecting, and on the device acknowledging the request
    pub connect_timeout: Duration,
    /// How often the record is checked for completeness
    pub poll_interval: Duration,
    /// How many poll intervals to wait for a complete record
    pub max_poll_attempts: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            max_poll_attempts: 50,
        }
    }
}

/// Reads telemetry from a single device.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceSession {
    cipher: FrameCipher,
    settings: SessionSettings,
}

impl DeviceSession {
    pub fn new(cipher: FrameCipher, settings: SessionSettings) -> Self {
        Self { cipher, settings }
    }

    /// Run one session against the device at `address`.
    ///
    /// Returns whatever telemetry arrived before the record was complete or
    /// the wait ran out, which may be a partial or even empty record. Fails
    /// only if the device could not be connected, or the request could not
    /// be delivered or subscribed to. Once connected, the device is always
    /// disconnected before returning.
    pub async fn run<L: Link>(&self, link: &L, address: &str) -> anyhow::Result<TelemetryRecord> {
        let connection = link.connect(address, self.settings.connect_timeout).await?;
        debug!("{address}: connected");

        let result = self.exchange(&connection, address).await;

        match connection.disconnect().await {
            Ok(()) => debug!("{address}: disconnected"),
            Err(err) => warn!("{address}: failed to disconnect: {err}"),
        }

        result
    }

    async fn exchange<C: Connection>(&self, connection: &C, address: &str) -> anyhow::Result<TelemetryRecord> {
        let request = self.cipher.encrypt(&REQUEST);
        debug!("{address}: TX: {}", hex::encode(request));

        timeout(
            self.settings.connect_timeout,
            connection.write(WRITE_CHARACTERISTIC_ID, &request, true),
        )
        .await
        .map_err(|_| anyhow!("Timed out writing request"))??;

        let notifications = connection.subscribe(NOTIFY_CHARACTERISTIC_ID).await?;
        let record = self.collect(notifications, address).await;

        if let Err(err) = connection.unsubscribe(NOTIFY_CHARACTERISTIC_ID).await {
            warn!("{address}: failed to unsubscribe: {err}");
        }

        Ok(record)
    }

    /// Merge notifications into a record until it is complete, the poll
    /// attempts are used up or the notification stream ends.
    async fn collect(&self, mut notifications: Notifications<'_>, address: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::default();

        'poll: for _ in 0..self.settings.max_poll_attempts {
            let tick = Instant::now() + self.settings.poll_interval;
            loop {
                match timeout_at(tick, notifications.next()).await {
                    Err(_) => break,
                    Ok(Some(Ok(data))) => {
                        self.handle_notification(&data, &mut record, address);
                        if record.is_complete() {
                            break 'poll;
                        }
                    }
                    Ok(Some(Err(err))) => {
                        // Nothing more is read this tick, so a stream stuck on errors
                        // still runs out of attempts
                        warn!("{address}: notification error: {err}");
                        sleep_until(tick).await;
                        break;
                    }
                    Ok(None) => {
                        debug!("{address}: end of notification stream");
                        break 'poll;
                    }
                }
            }
        }

        if !record.is_complete() {
            debug!("{address}: gave up waiting with incomplete record: {record}");
        }

        record
    }

    fn handle_notification(&self, data: &[u8], record: &mut TelemetryRecord, address: &str) {
        debug!("{address}: RX notification: 0x{}", hex::encode(data));

        let Ok(frame) = Frame::try_from(data) else {
            debug!("{address}: ignoring notification of {} bytes", data.len());
            return;
        };

        let decrypted = self.cipher.decrypt(&frame);
        match parse_frame(&decrypted) {
            Some(update) => record.merge(update),
            None => debug!("{address}: ignoring non telemetry frame 0x{}", hex::encode(decrypted)),
        }
    }
}
