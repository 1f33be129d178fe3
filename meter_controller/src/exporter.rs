use async_trait::async_trait;
use meter_core::{DefaultEncoder, Result};
use meter_sdk::CheckpointSet;
use std::sync::Arc;
use tracing::info;

/// Destination of the records produced by each collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<()>;
}

pub type DynExporter = Arc<dyn Exporter>;

/// Writes every exported record to the `tracing` log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

#[async_trait]
impl Exporter for LogExporter {
    async fn export(&self, checkpoint: &CheckpointSet) -> Result<()> {
        let encoder = DefaultEncoder::new();
        for record in checkpoint {
            let kind = record.descriptor.number_kind();
            info!(
                "{}{{{}}} {:?} = {} (count: {:?})",
                record.descriptor.name(),
                record.attributes.encoded(&encoder),
                record.aggregation.kind(),
                record.aggregation.scalar(kind),
                record.aggregation.count()
            );
        }
        Ok(())
    }
}
