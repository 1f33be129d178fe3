use meter_core::{
    DefaultEncoder, Descriptor, ErrorHandler, MetricsError, NumberKind, Result,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::aggregators::{
    Aggregation, BoxedAggregator, HistogramAggregator, LastValueAggregator,
    MinMaxSumCountAggregator, SumAggregator,
};
use crate::processor::{Accumulation, Processor};
use crate::selector::AggregatorSelector;

/// Keeps the snapshot of every processed record under
/// `"<instrument name>/<encoded attributes>"`.
#[derive(Default)]
pub struct MemoryProcessor {
    values: Mutex<HashMap<String, (NumberKind, Aggregation)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> HashMap<String, f64> {
        self.values
            .lock()
            .iter()
            .map(|(key, (kind, aggregation))| (key.clone(), aggregation.scalar(*kind)))
            .collect()
    }

    pub fn aggregation(&self, key: &str) -> Option<Aggregation> {
        self.values.lock().get(key).map(|(_, aggregation)| aggregation.clone())
    }

    /// Makes `process` fail for every record of the named instrument.
    pub fn fail_on(&self, instrument: impl Into<String>) {
        self.failing.lock().insert(instrument.into());
    }

    pub fn reset(&self) {
        self.values.lock().clear();
    }
}

impl Processor for MemoryProcessor {
    fn process(&self, accumulation: Accumulation<'_>) -> Result<()> {
        let descriptor = accumulation.descriptor();
        if self.failing.lock().contains(descriptor.name()) {
            return Err(MetricsError::Processor(format!(
                "refusing '{}'",
                descriptor.name()
            )));
        }

        let aggregation = accumulation.aggregator().aggregation(descriptor)?;
        let key = format!(
            "{}/{}",
            descriptor.name(),
            accumulation.attributes().encoded(&DefaultEncoder::new())
        );
        self.values
            .lock()
            .insert(key, (descriptor.number_kind(), aggregation));
        Ok(())
    }
}

pub const HISTOGRAM_TEST_BOUNDARIES: [f64; 3] = [1.0, 5.0, 10.0];

/// Chooses the aggregator from the suffix of the instrument name:
/// `.sum`, `.lastvalue`, `.minmaxsumcount`, `.histogram`, or `.disabled`
/// for no aggregator at all. Unknown suffixes are a test bug and panic.
#[derive(Debug, Default)]
pub struct SuffixSelector {
    allocations: AtomicUsize,
}

impl SuffixSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

impl AggregatorSelector for SuffixSelector {
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<BoxedAggregator> {
        let name = descriptor.name();
        let suffix = name.rsplit('.').next().unwrap_or_default();
        let aggregator: BoxedAggregator = match suffix {
            "sum" => Box::new(SumAggregator::new()),
            "lastvalue" => Box::new(LastValueAggregator::new()),
            "minmaxsumcount" => Box::new(MinMaxSumCountAggregator::new()),
            "histogram" => Box::new(HistogramAggregator::new(&HISTOGRAM_TEST_BOUNDARIES)),
            "disabled" => return None,
            other => panic!("invalid instrument name suffix '{}' in '{}'", other, name),
        };
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Some(aggregator)
    }
}

#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    last: Mutex<Option<MetricsError>>,
    count: AtomicUsize,
    input_errors: AtomicUsize,
}

impl RecordingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush(&self) -> Option<MetricsError> {
        self.last.lock().take()
    }

    pub fn reset(&self) {
        *self.last.lock() = None;
        self.count.store(0, Ordering::SeqCst);
        self.input_errors.store(0, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn input_errors(&self) -> usize {
        self.input_errors.load(Ordering::SeqCst)
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle(&self, err: MetricsError) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if err.is_input_error() {
            self.input_errors.fetch_add(1, Ordering::SeqCst);
        }
        *self.last.lock() = Some(err);
    }
}
