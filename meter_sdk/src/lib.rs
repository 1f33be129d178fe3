pub mod accumulator;
pub mod aggregators;
pub mod instrument;
pub mod meter;
pub mod processor;
pub mod selector;
pub mod testing;

pub use accumulator::{Accumulator, AccumulatorBuilder, AccumulatorConfig};
pub use aggregators::{Aggregation, AggregationKind, Aggregator, BoxedAggregator};
pub use instrument::{
    BatchObserverResult, Counter, CounterObserver, GaugeObserver, Histogram, Measurement,
    Observation, ObserverResult, UpDownCounter, UpDownCounterObserver,
};
pub use meter::{BatchObserverBuilder, InstrumentBuilder, Meter};
pub use processor::{
    Accumulation, BasicProcessor, CheckpointSet, DynProcessor, ExportRecord, Processor,
    Temporality,
};
pub use selector::{AggregatorSelector, DynAggregatorSelector, SimpleSelector};
