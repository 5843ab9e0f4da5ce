use std::path::PathBuf;
use std::sync::Arc;

use bm6read::{AggregationCycle, BluestLink, Config, DeviceSession, DryRunSink, MetricsSink, Scheduler, ThingSpeakClient};
use clap::Parser;
use log::info;

/// Poll BM6 battery monitors and forward their readings to ThingSpeak
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "bm6read.toml")]
    config: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Log reports instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!("Loaded configuration for {} modules", config.devices.len());

    if args.dry_run {
        serve(config, DryRunSink, args.once).await
    } else {
        let sink = ThingSpeakClient::new(&config.metrics.url, &config.metrics.api_key, config.metrics.timeout())?;
        serve(config, sink, args.once).await
    }
}

async fn serve<M: MetricsSink + 'static>(config: Config, sink: M, once: bool) -> anyhow::Result<()> {
    let link = BluestLink::new(config.session.connect_retries).await?;
    let session = DeviceSession::new(config.cipher()?, config.session.settings());
    let cycle = AggregationCycle::new(link, sink, config.devices.clone(), session).parallel(config.session.parallel);

    if once {
        cycle.run().await;
        return Ok(());
    }

    let cycle = Arc::new(cycle);
    let scheduler = Scheduler::new(config.schedule.interval()).run_immediately(config.schedule.run_immediately);
    info!("Service started. Running every {}s.", scheduler.period().as_secs());

    scheduler
        .run(move || {
            let cycle = cycle.clone();
            async move {
                cycle.run().await;
            }
        })
        .await;

    Ok(())
}
