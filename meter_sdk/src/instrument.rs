use meter_core::{
    handle_error, AttributeSet, Descriptor, KeyValue, MetricsError, Number, NumberValue,
};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::accumulator::{Accumulator, AccumulatorId};

pub(crate) type InstrumentId = u64;

pub(crate) struct InstrumentCore {
    pub(crate) id: InstrumentId,
    pub(crate) accumulator_id: AccumulatorId,
    pub(crate) descriptor: Descriptor,
    pub(crate) accumulator: Weak<Accumulator>,
}

impl fmt::Debug for InstrumentCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentCore")
            .field("id", &self.id)
            .field("accumulator_id", &self.accumulator_id)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

fn record_direct(core: &Option<Arc<InstrumentCore>>, number: Number, attributes: &[KeyValue]) {
    let bound = core
        .as_ref()
        .and_then(|core| core.accumulator.upgrade().map(|accumulator| (core, accumulator)));
    match bound {
        Some((core, accumulator)) => {
            accumulator.record(core, number, &AttributeSet::from_slice(attributes))
        }
        None => handle_error(MetricsError::UninitializedInstrument),
    }
}

macro_rules! instrument_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            core: Option<Arc<InstrumentCore>>,
            _marker: PhantomData<T>,
        }

        impl<T> $name<T> {
            pub(crate) fn bound(core: Arc<InstrumentCore>) -> Self {
                Self {
                    core: Some(core),
                    _marker: PhantomData,
                }
            }

            pub fn descriptor(&self) -> Option<&Descriptor> {
                self.core.as_ref().map(|core| &core.descriptor)
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self {
                    core: None,
                    _marker: PhantomData,
                }
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    core: self.core.clone(),
                    _marker: PhantomData,
                }
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("descriptor", &self.descriptor())
                    .finish()
            }
        }
    };
}

instrument_handle!(Counter);
instrument_handle!(UpDownCounter);
instrument_handle!(Histogram);
instrument_handle!(GaugeObserver);
instrument_handle!(CounterObserver);
instrument_handle!(UpDownCounterObserver);

impl<T: NumberValue> Counter<T> {
    pub fn add(&self, value: T, attributes: &[KeyValue]) {
        record_direct(&self.core, value.to_number(), attributes)
    }

    pub fn measurement(&self, value: T) -> Measurement {
        Measurement::new(self.core.clone(), value.to_number())
    }
}

impl<T: NumberValue> UpDownCounter<T> {
    pub fn add(&self, value: T, attributes: &[KeyValue]) {
        record_direct(&self.core, value.to_number(), attributes)
    }

    pub fn measurement(&self, value: T) -> Measurement {
        Measurement::new(self.core.clone(), value.to_number())
    }
}

impl<T: NumberValue> Histogram<T> {
    pub fn record(&self, value: T, attributes: &[KeyValue]) {
        record_direct(&self.core, value.to_number(), attributes)
    }

    pub fn measurement(&self, value: T) -> Measurement {
        Measurement::new(self.core.clone(), value.to_number())
    }
}

impl<T: NumberValue> GaugeObserver<T> {
    pub fn observation(&self, value: T) -> Observation {
        Observation::new(self.core.clone(), value.to_number())
    }
}

impl<T: NumberValue> CounterObserver<T> {
    pub fn observation(&self, value: T) -> Observation {
        Observation::new(self.core.clone(), value.to_number())
    }
}

impl<T: NumberValue> UpDownCounterObserver<T> {
    pub fn observation(&self, value: T) -> Observation {
        Observation::new(self.core.clone(), value.to_number())
    }
}

#[derive(Debug, Clone)]
pub struct Measurement {
    instrument: Option<Arc<InstrumentCore>>,
    number: Number,
}

impl Measurement {
    fn new(instrument: Option<Arc<InstrumentCore>>, number: Number) -> Self {
        Self { instrument, number }
    }

    pub(crate) fn instrument(&self) -> Option<&Arc<InstrumentCore>> {
        self.instrument.as_ref()
    }

    pub fn number(&self) -> Number {
        self.number
    }
}

#[derive(Debug, Clone)]
pub struct Observation {
    instrument: Option<Arc<InstrumentCore>>,
    number: Number,
}

impl Observation {
    fn new(instrument: Option<Arc<InstrumentCore>>, number: Number) -> Self {
        Self { instrument, number }
    }

    pub fn number(&self) -> Number {
        self.number
    }
}

pub struct ObserverResult<'a, T> {
    accumulator: &'a Accumulator,
    instrument: &'a Arc<InstrumentCore>,
    _marker: PhantomData<T>,
}

impl<'a, T: NumberValue> ObserverResult<'a, T> {
    pub(crate) fn new(accumulator: &'a Accumulator, instrument: &'a Arc<InstrumentCore>) -> Self {
        Self {
            accumulator,
            instrument,
            _marker: PhantomData,
        }
    }

    /// Within one collection the last observation for a given attribute set
    /// is the one reported.
    pub fn observe(&self, value: T, attributes: &[KeyValue]) {
        self.accumulator.observe(
            self.instrument,
            value.to_number(),
            &AttributeSet::from_slice(attributes),
        )
    }
}

pub struct BatchObserverResult<'a> {
    accumulator: &'a Accumulator,
}

impl<'a> BatchObserverResult<'a> {
    pub(crate) fn new(accumulator: &'a Accumulator) -> Self {
        Self { accumulator }
    }

    /// Reports several observations sharing one attribute set. Each is
    /// validated on its own; a rejected one does not stop the rest.
    pub fn observe(&self, attributes: &[KeyValue], observations: &[Observation]) {
        let attributes = AttributeSet::from_slice(attributes);
        for observation in observations {
            match &observation.instrument {
                Some(instrument) => {
                    self.accumulator
                        .observe(instrument, observation.number, &attributes)
                }
                None => self
                    .accumulator
                    .report(MetricsError::UninitializedInstrument),
            }
        }
    }
}
