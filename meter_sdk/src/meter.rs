use meter_core::{AttributeSet, Descriptor, InstrumentKind, KeyValue, NumberValue, Result};
use std::sync::Arc;

use crate::accumulator::Accumulator;
use crate::instrument::{
    BatchObserverResult, Counter, CounterObserver, GaugeObserver, Histogram, InstrumentCore,
    Measurement, ObserverResult, UpDownCounter, UpDownCounterObserver,
};

#[derive(Clone)]
pub struct Meter {
    accumulator: Arc<Accumulator>,
}

impl Meter {
    pub fn new(accumulator: Arc<Accumulator>) -> Self {
        Self { accumulator }
    }

    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.accumulator
    }

    pub fn instrument(&self, name: impl Into<String>) -> InstrumentBuilder<'_> {
        InstrumentBuilder {
            meter: self,
            name: name.into(),
            description: String::new(),
            unit: String::new(),
        }
    }

    pub fn new_counter<T: NumberValue>(&self, name: impl Into<String>) -> Result<Counter<T>> {
        self.instrument(name).counter()
    }

    pub fn new_up_down_counter<T: NumberValue>(
        &self,
        name: impl Into<String>,
    ) -> Result<UpDownCounter<T>> {
        self.instrument(name).up_down_counter()
    }

    pub fn new_histogram<T: NumberValue>(&self, name: impl Into<String>) -> Result<Histogram<T>> {
        self.instrument(name).histogram()
    }

    pub fn new_gauge_observer<T, F>(
        &self,
        name: impl Into<String>,
        callback: F,
    ) -> Result<GaugeObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        self.instrument(name).gauge_observer(callback)
    }

    pub fn new_counter_observer<T, F>(
        &self,
        name: impl Into<String>,
        callback: F,
    ) -> Result<CounterObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        self.instrument(name).counter_observer(callback)
    }

    pub fn new_up_down_counter_observer<T, F>(
        &self,
        name: impl Into<String>,
        callback: F,
    ) -> Result<UpDownCounterObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        self.instrument(name).up_down_counter_observer(callback)
    }

    /// Instruments created from the returned builder are fed by a single
    /// callback passed to [`BatchObserverBuilder::register`].
    pub fn batch_observer(&self) -> BatchObserverBuilder {
        BatchObserverBuilder {
            meter: self.clone(),
            names: Vec::new(),
        }
    }

    /// An invalid or unbound measurement is reported and skipped.
    pub fn record_batch(&self, attributes: &[KeyValue], measurements: &[Measurement]) {
        self.accumulator
            .record_batch(&AttributeSet::from_slice(attributes), measurements)
    }

    fn register(
        &self,
        name: String,
        kind: InstrumentKind,
        number: meter_core::NumberKind,
        description: String,
        unit: String,
    ) -> Result<Arc<InstrumentCore>> {
        let descriptor = Descriptor::new(name, kind, number)
            .with_description(description)
            .with_unit(unit);
        self.accumulator.register_instrument(descriptor)
    }

    fn register_observer<T, F>(&self, core: &Arc<InstrumentCore>, callback: F)
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        let instrument = core.clone();
        self.accumulator.register_callback(
            core.descriptor.name().to_string(),
            Arc::new(move |accumulator: &Accumulator| {
                let result = ObserverResult::<T>::new(accumulator, &instrument);
                callback(&result)
            }),
        );
    }
}

pub struct InstrumentBuilder<'a> {
    meter: &'a Meter,
    name: String,
    description: String,
    unit: String,
}

impl<'a> InstrumentBuilder<'a> {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    fn register<T: NumberValue>(self, kind: InstrumentKind) -> Result<Arc<InstrumentCore>> {
        self.meter
            .register(self.name, kind, T::KIND, self.description, self.unit)
    }

    pub fn counter<T: NumberValue>(self) -> Result<Counter<T>> {
        self.register::<T>(InstrumentKind::Counter)
            .map(Counter::bound)
    }

    pub fn up_down_counter<T: NumberValue>(self) -> Result<UpDownCounter<T>> {
        self.register::<T>(InstrumentKind::UpDownCounter)
            .map(UpDownCounter::bound)
    }

    pub fn histogram<T: NumberValue>(self) -> Result<Histogram<T>> {
        self.register::<T>(InstrumentKind::Histogram)
            .map(Histogram::bound)
    }

    pub fn gauge_observer<T, F>(self, callback: F) -> Result<GaugeObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        let meter = self.meter;
        let core = self.register::<T>(InstrumentKind::GaugeObserver)?;
        meter.register_observer(&core, callback);
        Ok(GaugeObserver::bound(core))
    }

    pub fn counter_observer<T, F>(self, callback: F) -> Result<CounterObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        let meter = self.meter;
        let core = self.register::<T>(InstrumentKind::CounterObserver)?;
        meter.register_observer(&core, callback);
        Ok(CounterObserver::bound(core))
    }

    pub fn up_down_counter_observer<T, F>(self, callback: F) -> Result<UpDownCounterObserver<T>>
    where
        T: NumberValue,
        F: Fn(&ObserverResult<'_, T>) + Send + Sync + 'static,
    {
        let meter = self.meter;
        let core = self.register::<T>(InstrumentKind::UpDownCounterObserver)?;
        meter.register_observer(&core, callback);
        Ok(UpDownCounterObserver::bound(core))
    }
}

pub struct BatchObserverBuilder {
    meter: Meter,
    names: Vec<String>,
}

impl BatchObserverBuilder {
    fn register_kind<T: NumberValue>(
        &mut self,
        name: String,
        kind: InstrumentKind,
    ) -> Result<Arc<InstrumentCore>> {
        let core = self
            .meter
            .register(name, kind, T::KIND, String::new(), String::new())?;
        self.names.push(core.descriptor.name().to_string());
        Ok(core)
    }

    pub fn new_gauge_observer<T: NumberValue>(
        &mut self,
        name: impl Into<String>,
    ) -> Result<GaugeObserver<T>> {
        self.register_kind::<T>(name.into(), InstrumentKind::GaugeObserver)
            .map(GaugeObserver::bound)
    }

    pub fn new_counter_observer<T: NumberValue>(
        &mut self,
        name: impl Into<String>,
    ) -> Result<CounterObserver<T>> {
        self.register_kind::<T>(name.into(), InstrumentKind::CounterObserver)
            .map(CounterObserver::bound)
    }

    pub fn new_up_down_counter_observer<T: NumberValue>(
        &mut self,
        name: impl Into<String>,
    ) -> Result<UpDownCounterObserver<T>> {
        self.register_kind::<T>(name.into(), InstrumentKind::UpDownCounterObserver)
            .map(UpDownCounterObserver::bound)
    }

    /// Installs the callback that observes every instrument of the batch,
    /// once per collection.
    pub fn register<F>(self, callback: F)
    where
        F: Fn(&BatchObserverResult<'_>) + Send + Sync + 'static,
    {
        let name = format!("batch[{}]", self.names.join(","));
        self.meter.accumulator.register_callback(
            name,
            Arc::new(move |accumulator: &Accumulator| {
                callback(&BatchObserverResult::new(accumulator))
            }),
        );
    }
}
