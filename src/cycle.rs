use futures_util::future::join_all;
use log::{info, warn};

use crate::link::Link;
use crate::metrics::MetricsSink;
use crate::report::CycleReport;
use crate::session::DeviceSession;
use crate::telemetry::TelemetryRecord;

/// Reads every configured device once and reports the results.
///
/// A device that fails contributes nothing to the report; it never stops the
/// other devices from being read or the report from being sent.
pub struct AggregationCycle<L, M> {
    link: L,
    sink: M,
    devices: Vec<String>,
    session: DeviceSession,
    parallel: bool,
}

impl<L: Link, M: MetricsSink> AggregationCycle<L, M> {
    pub fn new(link: L, sink: M, devices: Vec<String>, session: DeviceSession) -> Self {
        Self { link, sink, devices, session, parallel: false }
    }

    /// Run the device sessions concurrently rather than one after another
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run one cycle, returning the report that was built.
    ///
    /// The report is only posted if it has at least one slot filled.
    pub async fn run(&self) -> CycleReport {
        let records = self.read_devices().await;
        let report = CycleReport::build(&records);

        if report.is_empty() {
            warn!("No data received from any module, nothing to report");
            return report;
        }

        if let Err(err) = self.sink.post(&report).await {
            warn!("Failed to send report: {err:#}");
        }

        report
    }

    /// Read all devices, returning their results in configured order.
    async fn read_devices(&self) -> Vec<Option<TelemetryRecord>> {
        let reads = self
            .devices
            .iter()
            .enumerate()
            .map(|(index, address)| self.read_device(index + 1, address));

        if self.parallel {
            return join_all(reads).await;
        }

        let mut records = Vec::with_capacity(self.devices.len());
        for read in reads {
            records.push(read.await);
        }
        records
    }

    async fn read_device(&self, module: usize, address: &str) -> Option<TelemetryRecord> {
        match self.session.run(&self.link, address).await {
            Ok(record) => {
                info!("Module {module} ({address}) data: {record}");
                Some(record)
            }
            Err(err) => {
                warn!("Module {module} ({address}) returned no data: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{encrypted, Behaviour, MockLink, RecordingSink};
    use crate::report::Value;
    use tokio::time::{Duration, Instant};

    const MODULE_1: &str = "50:54:7B:24:36:A2";
    const MODULE_2: &str = "50:54:7B:24:3A:1C";
    const MODULE_3: &str = "50:54:7B:24:A8:C8";

    fn devices() -> Vec<String> {
        vec![MODULE_1.to_string(), MODULE_2.to_string(), MODULE_3.to_string()]
    }

    fn reading(polarity: &str, temperature: &str, soc: &str, voltage: &str) -> Behaviour {
        Behaviour::Notify(vec![encrypted(&format!("d15507{polarity}{temperature}00{soc}0{voltage}00000000000000"))])
    }

    fn healthy_link() -> MockLink {
        MockLink::new()
            .with(MODULE_1, reading("00", "15", "5a", "4ed"))
            .with(MODULE_2, reading("01", "03", "55", "4e7"))
            .with(MODULE_3, reading("00", "13", "46", "4d8"))
    }

    #[tokio::test(start_paused = true)]
    async fn reports_all_modules() {
        let cycle = AggregationCycle::new(healthy_link(), RecordingSink::default(), devices(), DeviceSession::default());

        let report = cycle.run().await;

        assert_eq!(
            report.to_string(),
            "field1=12.61 field2=12.55 field3=12.40 field4=90 field5=85 field6=70 field7=21 field8=-3"
        );
        assert_eq!(cycle.sink.reports(), vec![report]);
        assert_eq!(cycle.link.counters().disconnects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_module_does_not_shift_later_modules() {
        let link = healthy_link().with(MODULE_2, Behaviour::Refuse);
        let cycle = AggregationCycle::new(link, RecordingSink::default(), devices(), DeviceSession::default());

        let report = cycle.run().await;

        assert_eq!(report.get(1), Some(Value::Decimal(12.61)));
        assert_eq!(report.get(2), None);
        assert_eq!(report.get(3), Some(Value::Decimal(12.40)));
        assert_eq!(report.get(5), None);
        assert_eq!(report.get(6), Some(Value::Integer(70)));
        assert_eq!(report.get(7), Some(Value::Integer(21)));
        assert_eq!(report.get(8), Some(Value::Integer(19)));
        assert_eq!(cycle.sink.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_data_means_no_post() {
        let link = MockLink::new().with(MODULE_1, Behaviour::Refuse).with(MODULE_2, Behaviour::RejectWrite);
        let cycle = AggregationCycle::new(link, RecordingSink::default(), devices(), DeviceSession::default());

        let report = cycle.run().await;

        assert!(report.is_empty());
        assert!(cycle.sink.reports().is_empty());
        assert_eq!(cycle.link.counters().connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_modules_mean_no_post() {
        let link = MockLink::new()
            .with(MODULE_1, Behaviour::Notify(vec![]))
            .with(MODULE_2, Behaviour::NotifyThenClose(vec![]))
            .with(MODULE_3, Behaviour::Refuse);
        let cycle = AggregationCycle::new(link, RecordingSink::default(), devices(), DeviceSession::default());

        assert!(cycle.run().await.is_empty());
        assert!(cycle.sink.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_post_still_completes_the_cycle() {
        let cycle = AggregationCycle::new(healthy_link(), RecordingSink::failing(), devices(), DeviceSession::default());

        let report = cycle.run().await;

        assert_eq!(report.len(), 8);
        assert_eq!(cycle.sink.reports().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_sessions_keep_device_order() {
        let link = healthy_link().with(MODULE_1, Behaviour::Hang);
        let cycle = AggregationCycle::new(link, RecordingSink::default(), devices(), DeviceSession::default())
            .parallel(true);
        let started = Instant::now();

        let report = cycle.run().await;

        assert_eq!(report.to_string(), "field2=12.55 field3=12.40 field5=85 field6=70 field7=-3 field8=19");
        // Bounded by the slowest session rather than the sum of them
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_sessions_wait_for_each_device() {
        let link = MockLink::new()
            .with(MODULE_1, Behaviour::Hang)
            .with(MODULE_2, Behaviour::Hang)
            .with(MODULE_3, reading("00", "13", "46", "4d8"));
        let cycle = AggregationCycle::new(link, RecordingSink::default(), devices(), DeviceSession::default());
        let started = Instant::now();

        let report = cycle.run().await;

        assert_eq!(report.to_string(), "field3=12.40 field6=70 field7=19");
        assert!(started.elapsed() >= Duration::from_secs(60));
    }
}
