pub mod histogram;
pub mod last_value;
pub mod min_max_sum_count;
pub mod sum;

use chrono::{DateTime, Utc};
use meter_core::{Descriptor, MetricsError, Number, NumberKind, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

pub use histogram::HistogramAggregator;
pub use last_value::LastValueAggregator;
pub use min_max_sum_count::MinMaxSumCountAggregator;
pub use sum::SumAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Sum,
    LastValue,
    MinMaxSumCount,
    Histogram,
}

/// Per-record aggregation state. Callers serialize access.
pub trait Aggregator: fmt::Debug + Send + Sync + 'static {
    fn kind(&self) -> AggregationKind;

    fn update(&mut self, number: Number, descriptor: &Descriptor) -> Result<()>;

    /// Moves this state into `destination`, which must be of the same type,
    /// and resets this one.
    fn move_into(&mut self, destination: &mut dyn Aggregator, descriptor: &Descriptor)
        -> Result<()>;

    fn merge(&mut self, other: &dyn Aggregator, descriptor: &Descriptor) -> Result<()>;

    fn reset(&mut self);

    fn aggregation(&self, descriptor: &Descriptor) -> Result<Aggregation>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type BoxedAggregator = Box<dyn Aggregator>;

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Sum {
        value: Number,
    },
    LastValue {
        value: Number,
        timestamp: DateTime<Utc>,
    },
    MinMaxSumCount {
        min: Number,
        max: Number,
        sum: Number,
        count: u64,
    },
    Histogram {
        sum: Number,
        count: u64,
        boundaries: Vec<f64>,
        bucket_counts: Vec<u64>,
    },
}

impl Aggregation {
    pub fn kind(&self) -> AggregationKind {
        match self {
            Aggregation::Sum { .. } => AggregationKind::Sum,
            Aggregation::LastValue { .. } => AggregationKind::LastValue,
            Aggregation::MinMaxSumCount { .. } => AggregationKind::MinMaxSumCount,
            Aggregation::Histogram { .. } => AggregationKind::Histogram,
        }
    }

    /// A single representative value: the total for sums and distributions,
    /// the observed value for last-value.
    pub fn scalar(&self, kind: NumberKind) -> f64 {
        match self {
            Aggregation::Sum { value } => value.to_f64(kind),
            Aggregation::LastValue { value, .. } => value.to_f64(kind),
            Aggregation::MinMaxSumCount { sum, .. } => sum.to_f64(kind),
            Aggregation::Histogram { sum, .. } => sum.to_f64(kind),
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Aggregation::MinMaxSumCount { count, .. } | Aggregation::Histogram { count, .. } => {
                Some(*count)
            }
            _ => None,
        }
    }
}

pub(crate) fn inconsistent(this: AggregationKind, other: AggregationKind) -> MetricsError {
    MetricsError::InconsistentAggregator(format!("cannot combine {:?} with {:?}", this, other))
}

pub(crate) fn same_kind<'a, T: Aggregator>(
    this: AggregationKind,
    other: &'a dyn Aggregator,
) -> Result<&'a T> {
    let other_kind = other.kind();
    other
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| inconsistent(this, other_kind))
}

pub(crate) fn same_kind_mut<'a, T: Aggregator>(
    this: AggregationKind,
    other: &'a mut dyn Aggregator,
) -> Result<&'a mut T> {
    let other_kind = other.kind();
    other
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| inconsistent(this, other_kind))
}
