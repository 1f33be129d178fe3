use meter_core::{Descriptor, Number, Result};
use std::any::Any;

use super::{same_kind, same_kind_mut, Aggregation, AggregationKind, Aggregator};

#[derive(Debug, Clone, Copy, Default)]
pub struct SumAggregator {
    value: Number,
}

impl SumAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for SumAggregator {
    fn kind(&self) -> AggregationKind {
        AggregationKind::Sum
    }

    fn update(&mut self, number: Number, descriptor: &Descriptor) -> Result<()> {
        self.value = self.value.add(number, descriptor.number_kind());
        Ok(())
    }

    fn move_into(&mut self, destination: &mut dyn Aggregator, _descriptor: &Descriptor) -> Result<()> {
        let destination = same_kind_mut::<Self>(self.kind(), destination)?;
        destination.value = self.value;
        self.reset();
        Ok(())
    }

    fn merge(&mut self, other: &dyn Aggregator, descriptor: &Descriptor) -> Result<()> {
        let other = same_kind::<Self>(self.kind(), other)?;
        self.value = self.value.add(other.value, descriptor.number_kind());
        Ok(())
    }

    fn reset(&mut self) {
        self.value = Number::zero();
    }

    fn aggregation(&self, _descriptor: &Descriptor) -> Result<Aggregation> {
        Ok(Aggregation::Sum { value: self.value })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
