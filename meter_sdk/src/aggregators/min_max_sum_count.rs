use meter_core::{Descriptor, MetricsError, Number, NumberKind, Result};
use std::any::Any;
use std::cmp::Ordering;

use super::{same_kind, same_kind_mut, Aggregation, AggregationKind, Aggregator};

#[derive(Debug, Clone, Copy)]
struct State {
    min: Number,
    max: Number,
    sum: Number,
    count: u64,
}

impl State {
    fn single(number: Number) -> Self {
        Self {
            min: number,
            max: number,
            sum: number,
            count: 1,
        }
    }

    fn merge(&mut self, other: &State, kind: NumberKind) {
        self.count += other.count;
        self.sum = self.sum.add(other.sum, kind);
        if other.min.partial_cmp(self.min, kind) == Some(Ordering::Less) {
            self.min = other.min;
        }
        if other.max.partial_cmp(self.max, kind) == Some(Ordering::Greater) {
            self.max = other.max;
        }
    }
}

/// Count, sum, min and max of the recorded values. The inexpensive
/// distribution for histograms.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxSumCountAggregator {
    state: Option<State>,
}

impl MinMaxSumCountAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for MinMaxSumCountAggregator {
    fn kind(&self) -> AggregationKind {
        AggregationKind::MinMaxSumCount
    }

    fn update(&mut self, number: Number, descriptor: &Descriptor) -> Result<()> {
        let single = State::single(number);
        match &mut self.state {
            Some(state) => state.merge(&single, descriptor.number_kind()),
            None => self.state = Some(single),
        }
        Ok(())
    }

    fn move_into(&mut self, destination: &mut dyn Aggregator, _descriptor: &Descriptor) -> Result<()> {
        let destination = same_kind_mut::<Self>(self.kind(), destination)?;
        destination.state = self.state.take();
        Ok(())
    }

    fn merge(&mut self, other: &dyn Aggregator, descriptor: &Descriptor) -> Result<()> {
        let other = same_kind::<Self>(self.kind(), other)?;
        if let Some(theirs) = other.state {
            match &mut self.state {
                Some(mine) => mine.merge(&theirs, descriptor.number_kind()),
                None => self.state = Some(theirs),
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = None;
    }

    fn aggregation(&self, _descriptor: &Descriptor) -> Result<Aggregation> {
        let state = self.state.ok_or(MetricsError::NoData)?;
        Ok(Aggregation::MinMaxSumCount {
            min: state.min,
            max: state.max,
            sum: state.sum,
            count: state.count,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
