pub mod basic;

use meter_core::{AttributeSet, Descriptor, Result};
use std::sync::Arc;

use crate::aggregators::Aggregator;

pub use basic::{BasicProcessor, CheckpointSet, ExportRecord, Temporality};

/// The aggregator is only borrowed for the duration of `process`.
#[derive(Debug, Clone, Copy)]
pub struct Accumulation<'a> {
    descriptor: &'a Descriptor,
    attributes: &'a AttributeSet,
    aggregator: &'a dyn Aggregator,
}

impl<'a> Accumulation<'a> {
    pub fn new(
        descriptor: &'a Descriptor,
        attributes: &'a AttributeSet,
        aggregator: &'a dyn Aggregator,
    ) -> Self {
        Self {
            descriptor,
            attributes,
            aggregator,
        }
    }

    pub fn descriptor(&self) -> &'a Descriptor {
        self.descriptor
    }

    pub fn attributes(&self) -> &'a AttributeSet {
        self.attributes
    }

    pub fn aggregator(&self) -> &'a dyn Aggregator {
        self.aggregator
    }
}

pub trait Processor: Send + Sync {
    fn process(&self, accumulation: Accumulation<'_>) -> Result<()>;
}

pub type DynProcessor = Arc<dyn Processor>;
