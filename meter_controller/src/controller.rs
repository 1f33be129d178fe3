use meter_core::{DynErrorHandler, GlobalErrorHandler, MetricsError, Result};
use meter_sdk::{Accumulator, BasicProcessor, CheckpointSet, Meter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::exporter::DynExporter;

pub struct PushController {
    config: ControllerConfig,
    meter: Meter,
    processor: Arc<BasicProcessor>,
    exporter: DynExporter,
    error_handler: DynErrorHandler,
    cycle_lock: tokio::sync::Mutex<()>,
    running: Mutex<Option<RunningLoop>>,
}

/// One spawned collection loop. Each `start` gets its own token so the
/// controller can be started again after `stop`.
struct RunningLoop {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl PushController {
    pub fn builder(config: ControllerConfig, exporter: DynExporter) -> PushControllerBuilder {
        PushControllerBuilder {
            config,
            exporter,
            error_handler: None,
        }
    }

    pub fn new(config: ControllerConfig, exporter: DynExporter) -> Result<Arc<Self>> {
        Self::builder(config, exporter).build()
    }

    pub fn meter(&self) -> Meter {
        self.meter.clone()
    }

    pub fn accumulator(&self) -> &Arc<Accumulator> {
        self.meter.accumulator()
    }

    pub fn processor(&self) -> &Arc<BasicProcessor> {
        &self.processor
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map_or(false, |running| !running.task.is_finished())
    }

    /// Spawns the collection loop on the current tokio runtime. Calling it
    /// on a running controller does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.as_ref().map_or(false, |r| !r.task.is_finished()) {
            warn!("Controller already running");
            return;
        }

        info!(
            "Starting controller: period {}, timeout {}",
            humantime::format_duration(self.config.collect_period),
            humantime::format_duration(self.config.collect_timeout)
        );
        let shutdown = CancellationToken::new();
        let controller = Arc::clone(self);
        let token = shutdown.clone();
        let task = tokio::spawn(async move { controller.run(token).await });
        *running = Some(RunningLoop { task, shutdown });
    }

    /// Stops the loop and runs a final collection.
    pub async fn stop(&self) -> Result<()> {
        let running = self.running.lock().take();
        if let Some(RunningLoop { task, shutdown }) = running {
            shutdown.cancel();
            if let Err(e) = task.await {
                warn!("Controller task ended abnormally: {}", e);
            }
        }

        info!("Controller stopping, running final collection");
        self.collect().await.map(|_| ())
    }

    /// One collect and export cycle, usable without starting the loop.
    pub async fn collect(&self) -> Result<usize> {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();

        self.processor.start_collection();
        let accumulator = Arc::clone(self.meter.accumulator());
        let exported = tokio::task::spawn_blocking(move || accumulator.collect())
            .await
            .map_err(|e| MetricsError::Other(anyhow::Error::new(e)))?;
        self.processor.finish_collection()?;

        let checkpoint = self.processor.checkpoint_set();
        self.export(&checkpoint).await?;

        debug!(
            exported,
            records = checkpoint.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection exported"
        );
        Ok(exported)
    }

    async fn export(&self, checkpoint: &CheckpointSet) -> Result<()> {
        let timeout = self.config.collect_timeout;
        match tokio::time::timeout(timeout, self.exporter.export(checkpoint)).await {
            Ok(result) => result,
            Err(_) => Err(MetricsError::Export(format!(
                "export timed out after {}",
                humantime::format_duration(timeout)
            ))),
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.collect_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Controller loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.collect().await {
                        warn!("Collection cycle failed: {}", e);
                        self.error_handler.handle(e);
                    }
                }
            }
        }
    }
}

pub struct PushControllerBuilder {
    config: ControllerConfig,
    exporter: DynExporter,
    error_handler: Option<DynErrorHandler>,
}

impl PushControllerBuilder {
    /// Receives validation errors from the accumulator and failed cycles
    /// from the loop.
    pub fn error_handler(mut self, handler: DynErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Arc<PushController>> {
        self.config.validate().map_err(MetricsError::InvalidConfig)?;

        let error_handler = self
            .error_handler
            .unwrap_or_else(|| Arc::new(GlobalErrorHandler));
        let selector = self.config.selector();
        let processor = Arc::new(BasicProcessor::new(
            selector.clone(),
            self.config.temporality,
        ));
        let accumulator = Accumulator::builder()
            .selector(selector)
            .error_handler(error_handler.clone())
            .config(self.config.accumulator_config())
            .build(processor.clone());

        Ok(Arc::new(PushController {
            config: self.config,
            meter: Meter::new(accumulator),
            processor,
            exporter: self.exporter,
            error_handler,
            cycle_lock: tokio::sync::Mutex::new(()),
            running: Mutex::new(None),
        }))
    }
}
