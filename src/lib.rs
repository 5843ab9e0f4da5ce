//! Read BM6 battery monitors over Bluetooth Low Energy and forward their readings to a metrics endpoint.
//!
//! A BM6 is a small module wired to a 12V battery which reports the battery's voltage, state of charge
//! and its own temperature. It talks a proprietary protocol over two GATT characteristics: an encrypted
//! 16 byte request frame is written to one, and encrypted 16 byte frames are notified on the other.
//! Frames are AES-128-CBC encrypted with a fixed key.
//!
//! Every cycle, each configured module is connected, asked for its telemetry and disconnected again.
//! The readings are then posted as one report with numbered fields, ThingSpeak style:
//!
//! - Voltage (V) of modules 1-3 in `field1`-`field3`
//! - State of charge (%) of modules 1-3 in `field4`-`field6`
//! - Temperature (°C) of the first two responding modules in `field7`-`field8`
//!
//! A module that cannot be reached simply leaves its fields out of the report.
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! # use bm6read::{AggregationCycle, BluestLink, DeviceSession, DryRunSink, Scheduler};
//! # use std::sync::Arc;
//! #
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let link = BluestLink::new(2).await?;
//!     let devices = vec!["50:54:7B:24:36:A2".to_string()];
//!     let cycle = Arc::new(AggregationCycle::new(link, DryRunSink, devices, DeviceSession::default()));
//!
//!     Scheduler::new(Duration::from_secs(15 * 60))
//!         .run_immediately(true)
//!         .run(move || {
//!             let cycle = cycle.clone();
//!             async move {
//!                 cycle.run().await;
//!             }
//!         })
//!         .await;
//! #   Ok(())
//! # }
//! ```

mod ble;
mod cipher;
mod config;
mod cycle;
mod link;
mod metrics;
#[cfg(test)]
mod mock;
mod report;
mod scheduler;
mod session;
mod telemetry;

pub use ble::{BluestConnection, BluestLink};
pub use cipher::{Frame, FrameCipher, BM6_KEY, FRAME_LEN};
pub use self::config::{Config, MetricsConfig, ScheduleConfig, SessionConfig};
pub use cycle::AggregationCycle;
pub use link::{Connection, Link, Notifications};
pub use metrics::{DryRunSink, MetricsSink, ThingSpeakClient};
pub use report::{CycleReport, Value};
pub use scheduler::Scheduler;
pub use session::{DeviceSession, SessionSettings, NOTIFY_CHARACTERISTIC_ID, REQUEST, SERVICE_ID, WRITE_CHARACTERISTIC_ID};
pub use telemetry::{parse_frame, parse_hex, TelemetryRecord, TELEMETRY_TAG};
