//! Delivery of cycle reports to a metrics endpoint.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::info;

use crate::report::CycleReport;

/// Somewhere to send cycle reports.
///
/// A failed delivery is reported as an error; callers decide whether to log
/// it or retry.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn post(&self, report: &CycleReport) -> anyhow::Result<()>;
}

/// Posts reports to a ThingSpeak channel's update endpoint.
///
/// Fields are form encoded as `field1`..`field8` alongside the channel's
/// write `api_key`.
pub struct ThingSpeakClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl ThingSpeakClient {
    pub const DEFAULT_URL: &'static str = "https://api.thingspeak.com/update";

    pub fn new(url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.to_string(), api_key: api_key.to_string() })
    }

    fn form(&self, report: &CycleReport) -> Vec<(String, String)> {
        let mut form = vec![("api_key".to_string(), self.api_key.clone())];
        form.extend(report.fields());
        form
    }
}

#[async_trait]
impl MetricsSink for ThingSpeakClient {
    async fn post(&self, report: &CycleReport) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).form(&self.form(report)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Metrics endpoint returned {status}"));
        }

        // ThingSpeak answers 200 with an entry id of 0 when it drops an update,
        // e.g. when posting faster than the channel's rate limit.
        let entry_id = response.text().await?;
        if entry_id.trim() == "0" {
            return Err(anyhow!("Metrics endpoint rejected the update"));
        }

        info!("Report sent as entry {}", entry_id.trim());
        Ok(())
    }
}

/// Logs reports instead of sending them anywhere.
pub struct DryRunSink;

#[async_trait]
impl MetricsSink for DryRunSink {
    async fn post(&self, report: &CycleReport) -> anyhow::Result<()> {
        info!("Dry run, not sending report: {report}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryRecord;

    #[test]
    fn form_carries_api_key_then_fields() {
        let client = ThingSpeakClient::new(ThingSpeakClient::DEFAULT_URL, "KEY", Duration::from_secs(10)).unwrap();
        let report = CycleReport::build(&[
            None,
            Some(TelemetryRecord { voltage_cv: Some(1261), state_of_charge_pct: Some(88), temperature_c: Some(-4) }),
        ]);

        let form = client.form(&report);

        let form: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(
            form,
            vec![("api_key", "KEY"), ("field2", "12.61"), ("field5", "88"), ("field7", "-4")]
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let client = ThingSpeakClient::new("http://127.0.0.1:9/update", "KEY", Duration::from_secs(1)).unwrap();
        let report = CycleReport::build(&[Some(TelemetryRecord { voltage_cv: Some(1261), ..Default::default() })]);

        assert!(client.post(&report).await.is_err());
    }

    #[tokio::test]
    async fn dry_run_accepts_everything() {
        assert!(DryRunSink.post(&CycleReport::default()).await.is_ok());
    }
}
