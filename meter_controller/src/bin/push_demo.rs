use meter_controller::exporter::LogExporter;
use meter_controller::{parse_config_from_file, ControllerConfig, PushController};
use meter_core::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => parse_config_from_file(path).await?,
        None => ControllerConfig::builder()
            .collect_period(Duration::from_secs(1))
            .build(),
    };

    let controller = PushController::new(config, Arc::new(LogExporter))?;
    let meter = controller.meter();

    let requests = meter
        .instrument("demo.requests")
        .description("handled requests")
        .counter::<i64>()?;
    let latency = meter
        .instrument("demo.latency")
        .unit("ms")
        .histogram::<f64>()?;
    let started = Instant::now();
    meter.new_gauge_observer::<f64, _>("demo.uptime", move |result| {
        result.observe(started.elapsed().as_secs_f64(), &[])
    })?;

    controller.start();
    info!("Recording for 5s");

    for i in 0..50u32 {
        let route = if i % 3 == 0 { "/" } else { "/api" };
        requests.add(1, &[KeyValue::new("route", route)]);
        latency.record(f64::from(i % 7) * 1.5, &[KeyValue::new("route", route)]);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    controller.stop().await?;
    Ok(())
}
