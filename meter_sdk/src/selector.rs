use meter_core::{Descriptor, InstrumentKind};
use std::sync::Arc;

use crate::aggregators::{
    BoxedAggregator, HistogramAggregator, LastValueAggregator, MinMaxSumCountAggregator,
    SumAggregator,
};

/// Returning `None` disables the instrument.
pub trait AggregatorSelector: Send + Sync {
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<BoxedAggregator>;

    fn aggregator_pair_for(
        &self,
        descriptor: &Descriptor,
    ) -> Option<(BoxedAggregator, BoxedAggregator)> {
        let current = self.aggregator_for(descriptor)?;
        let checkpoint = self.aggregator_for(descriptor)?;
        Some((current, checkpoint))
    }
}

pub type DynAggregatorSelector = Arc<dyn AggregatorSelector>;

/// Histograms are summarised by a [`MinMaxSumCountAggregator`].
pub fn inexpensive() -> SimpleSelector {
    SimpleSelector {
        distribution: Distribution::MinMaxSumCount,
    }
}

/// Histograms are summarised by a [`HistogramAggregator`] over `boundaries`.
pub fn with_histogram(boundaries: &[f64]) -> SimpleSelector {
    let template = HistogramAggregator::new(boundaries);
    SimpleSelector {
        distribution: Distribution::Histogram(template.boundaries().into()),
    }
}

#[derive(Debug, Clone)]
enum Distribution {
    MinMaxSumCount,
    Histogram(Arc<[f64]>),
}

/// Sums for counters and sum observers, last value for gauges, and a
/// configurable distribution for histograms.
#[derive(Debug, Clone)]
pub struct SimpleSelector {
    distribution: Distribution,
}

impl AggregatorSelector for SimpleSelector {
    fn aggregator_for(&self, descriptor: &Descriptor) -> Option<BoxedAggregator> {
        let aggregator: BoxedAggregator = match descriptor.instrument_kind() {
            InstrumentKind::GaugeObserver => Box::new(LastValueAggregator::new()),
            InstrumentKind::Histogram => match &self.distribution {
                Distribution::MinMaxSumCount => Box::new(MinMaxSumCountAggregator::new()),
                Distribution::Histogram(boundaries) => {
                    Box::new(HistogramAggregator::with_sorted(boundaries.clone()))
                }
            },
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::CounterObserver
            | InstrumentKind::UpDownCounterObserver => Box::new(SumAggregator::new()),
        };
        Some(aggregator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::AggregationKind;
    use meter_core::NumberKind;

    fn kind_for(selector: &dyn AggregatorSelector, kind: InstrumentKind) -> AggregationKind {
        let desc = Descriptor::new("x", kind, NumberKind::F64);
        selector.aggregator_for(&desc).unwrap().kind()
    }

    #[test]
    fn test_inexpensive_selector() {
        let selector = inexpensive();
        assert_eq!(kind_for(&selector, InstrumentKind::Counter), AggregationKind::Sum);
        assert_eq!(kind_for(&selector, InstrumentKind::UpDownCounter), AggregationKind::Sum);
        assert_eq!(
            kind_for(&selector, InstrumentKind::Histogram),
            AggregationKind::MinMaxSumCount
        );
        assert_eq!(
            kind_for(&selector, InstrumentKind::GaugeObserver),
            AggregationKind::LastValue
        );
        assert_eq!(kind_for(&selector, InstrumentKind::CounterObserver), AggregationKind::Sum);
        assert_eq!(
            kind_for(&selector, InstrumentKind::UpDownCounterObserver),
            AggregationKind::Sum
        );
    }

    #[test]
    fn test_histogram_selector_shares_boundaries() {
        let selector = with_histogram(&[5.0, 1.0]);
        let desc = Descriptor::new("h", InstrumentKind::Histogram, NumberKind::F64);
        let (current, checkpoint) = selector.aggregator_pair_for(&desc).unwrap();

        assert_eq!(current.kind(), AggregationKind::Histogram);
        let current = current
            .as_any()
            .downcast_ref::<HistogramAggregator>()
            .unwrap();
        let checkpoint = checkpoint
            .as_any()
            .downcast_ref::<HistogramAggregator>()
            .unwrap();
        assert_eq!(current.boundaries(), &[1.0, 5.0]);
        assert_eq!(current.boundaries(), checkpoint.boundaries());
    }
}
