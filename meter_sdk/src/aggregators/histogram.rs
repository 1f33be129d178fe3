use meter_core::{Descriptor, MetricsError, Number, Result};
use std::any::Any;
use std::sync::Arc;

use super::{same_kind, same_kind_mut, Aggregation, AggregationKind, Aggregator};

/// Bucket `i` counts values in `[boundaries[i - 1], boundaries[i])`.
#[derive(Debug, Clone)]
pub struct HistogramAggregator {
    boundaries: Arc<[f64]>,
    bucket_counts: Vec<u64>,
    sum: Number,
    count: u64,
}

impl HistogramAggregator {
    /// Boundaries are sorted; NaN boundaries are dropped.
    pub fn new(boundaries: &[f64]) -> Self {
        let mut sorted: Vec<f64> = boundaries.iter().copied().filter(|b| !b.is_nan()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted.dedup();
        Self::with_sorted(sorted.into())
    }

    pub(crate) fn with_sorted(boundaries: Arc<[f64]>) -> Self {
        let buckets = boundaries.len() + 1;
        Self {
            boundaries,
            bucket_counts: vec![0; buckets],
            sum: Number::zero(),
            count: 0,
        }
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    fn check_boundaries(&self, other: &HistogramAggregator) -> Result<()> {
        if self.boundaries != other.boundaries {
            return Err(MetricsError::InconsistentAggregator(
                "histogram boundaries differ".to_string(),
            ));
        }
        Ok(())
    }
}

impl Aggregator for HistogramAggregator {
    fn kind(&self) -> AggregationKind {
        AggregationKind::Histogram
    }

    fn update(&mut self, number: Number, descriptor: &Descriptor) -> Result<()> {
        let kind = descriptor.number_kind();
        let value = number.to_f64(kind);
        let bucket = self.boundaries.partition_point(|b| *b <= value);

        self.bucket_counts[bucket] += 1;
        self.sum = self.sum.add(number, kind);
        self.count += 1;
        Ok(())
    }

    fn move_into(&mut self, destination: &mut dyn Aggregator, _descriptor: &Descriptor) -> Result<()> {
        let destination = same_kind_mut::<Self>(self.kind(), destination)?;
        self.check_boundaries(destination)?;

        destination.bucket_counts.copy_from_slice(&self.bucket_counts);
        destination.sum = self.sum;
        destination.count = self.count;
        self.reset();
        Ok(())
    }

    fn merge(&mut self, other: &dyn Aggregator, descriptor: &Descriptor) -> Result<()> {
        let other = same_kind::<Self>(self.kind(), other)?;
        self.check_boundaries(other)?;

        for (mine, theirs) in self.bucket_counts.iter_mut().zip(&other.bucket_counts) {
            *mine += theirs;
        }
        self.sum = self.sum.add(other.sum, descriptor.number_kind());
        self.count += other.count;
        Ok(())
    }

    fn reset(&mut self) {
        self.bucket_counts.iter_mut().for_each(|c| *c = 0);
        self.sum = Number::zero();
        self.count = 0;
    }

    fn aggregation(&self, _descriptor: &Descriptor) -> Result<Aggregation> {
        Ok(Aggregation::Histogram {
            sum: self.sum,
            count: self.count,
            boundaries: self.boundaries.to_vec(),
            bucket_counts: self.bucket_counts.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
