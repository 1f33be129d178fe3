use chrono::{DateTime, Utc};
use meter_core::{Descriptor, MetricsError, Number, Result};
use std::any::Any;

use super::{same_kind, same_kind_mut, Aggregation, AggregationKind, Aggregator};

#[derive(Debug, Clone, Copy)]
struct Observed {
    value: Number,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LastValueAggregator {
    last: Option<Observed>,
}

impl LastValueAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for LastValueAggregator {
    fn kind(&self) -> AggregationKind {
        AggregationKind::LastValue
    }

    fn update(&mut self, number: Number, _descriptor: &Descriptor) -> Result<()> {
        self.last = Some(Observed {
            value: number,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn move_into(&mut self, destination: &mut dyn Aggregator, _descriptor: &Descriptor) -> Result<()> {
        let destination = same_kind_mut::<Self>(self.kind(), destination)?;
        destination.last = self.last.take();
        Ok(())
    }

    /// The later of the two observations wins; on a tie this one is kept.
    fn merge(&mut self, other: &dyn Aggregator, _descriptor: &Descriptor) -> Result<()> {
        let other = same_kind::<Self>(self.kind(), other)?;
        match (self.last, other.last) {
            (_, None) => {}
            (None, Some(_)) => self.last = other.last,
            (Some(mine), Some(theirs)) => {
                if theirs.timestamp > mine.timestamp {
                    self.last = other.last;
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.last = None;
    }

    fn aggregation(&self, _descriptor: &Descriptor) -> Result<Aggregation> {
        let last = self.last.ok_or(MetricsError::NoData)?;
        Ok(Aggregation::LastValue {
            value: last.value,
            timestamp: last.timestamp,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
