//! In-memory [`Link`] and [`MetricsSink`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::Uuid;
use futures_util::stream;
use futures_util::StreamExt;
use tokio::time::Duration;

use crate::cipher::{Frame, FrameCipher, FRAME_LEN};
use crate::link::{Connection, Link, Notifications};
use crate::metrics::MetricsSink;
use crate::report::CycleReport;

/// Encrypt a plaintext frame given as hex, zero filling it to a whole frame.
pub(crate) fn encrypted(h: &str) -> Vec<u8> {
    let bytes = hex::decode(h).unwrap();
    let mut frame: Frame = [0; FRAME_LEN];
    frame[..bytes.len()].copy_from_slice(&bytes);
    FrameCipher::default().encrypt(&frame).to_vec()
}

/// How a mock device responds to a session.
#[derive(Clone)]
pub(crate) enum Behaviour {
    /// Connection attempts fail immediately
    Refuse,
    /// Connection attempts never complete, so they run out of time
    Hang,
    /// Connects, but writes fail
    RejectWrite,
    /// Connects and accepts the request, but notifications can't be set up
    RejectSubscribe,
    /// Delivers a notification error, then the given notifications, then stays silent
    ErrorThenNotify(Vec<Vec<u8>>),
    /// Delivers notification errors without end
    AlwaysError,
    /// Delivers the given notifications, then stays silent
    Notify(Vec<Vec<u8>>),
    /// Delivers the given notifications, then ends the stream
    NotifyThenClose(Vec<Vec<u8>>),
}

#[derive(Default)]
pub(crate) struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    unsubscribes: AtomicUsize,
    writes: Mutex<Vec<(Uuid, Vec<u8>, bool)>>,
}

impl Counters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>, bool)> {
        self.writes.lock().unwrap().clone()
    }
}

/// Devices not explicitly configured refuse connections.
#[derive(Default)]
pub(crate) struct MockLink {
    devices: HashMap<String, Behaviour>,
    counters: Arc<Counters>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: &str, behaviour: Behaviour) -> Self {
        self.devices.insert(address.to_string(), behaviour);
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

#[async_trait]
impl Link for MockLink {
    type Connection = MockConnection;

    async fn connect(&self, address: &str, timeout: Duration) -> anyhow::Result<MockConnection> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        match self.devices.get(address) {
            None | Some(Behaviour::Refuse) => Err(anyhow!("Connection refused by {address}")),
            Some(Behaviour::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(anyhow!("Timed out connecting"))
            }
            Some(behaviour) => Ok(MockConnection { behaviour: behaviour.clone(), counters: self.counters.clone() }),
        }
    }
}

pub(crate) struct MockConnection {
    behaviour: Behaviour,
    counters: Arc<Counters>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&self, characteristic: Uuid, payload: &[u8], with_response: bool) -> anyhow::Result<()> {
        if let Behaviour::RejectWrite = self.behaviour {
            return Err(anyhow!("Write rejected"));
        }
        self.counters
            .writes
            .lock()
            .unwrap()
            .push((characteristic, payload.to_vec(), with_response));
        Ok(())
    }

    async fn subscribe(&self, _characteristic: Uuid) -> anyhow::Result<Notifications<'_>> {
        match &self.behaviour {
            Behaviour::Notify(frames) => Ok(stream::iter(frames.clone().into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Behaviour::NotifyThenClose(frames) => Ok(stream::iter(frames.clone().into_iter().map(Ok)).boxed()),
            Behaviour::ErrorThenNotify(frames) => Ok(stream::once(async { Err(anyhow!("Notification dropped")) })
                .chain(stream::iter(frames.clone().into_iter().map(Ok)))
                .chain(stream::pending())
                .boxed()),
            Behaviour::AlwaysError => Ok(stream::repeat_with(|| Err(anyhow!("Notification dropped"))).boxed()),
            _ => Err(anyhow!("Notifications not supported")),
        }
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> anyhow::Result<()> {
        self.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every report it is given.
#[derive(Default)]
pub(crate) struct RecordingSink {
    reports: Mutex<Vec<CycleReport>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self { reports: Mutex::default(), fail: true }
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn post(&self, report: &CycleReport) -> anyhow::Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        if self.fail {
            return Err(anyhow!("Metrics endpoint returned 500 Internal Server Error"));
        }
        Ok(())
    }
}
