use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meter_core::{
    range_test, AttributeSet, Descriptor, DynErrorHandler, GlobalErrorHandler, MetricsError,
    Number,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregators::BoxedAggregator;
use crate::instrument::{InstrumentCore, InstrumentId};
use crate::processor::{Accumulation, DynProcessor};
use crate::selector::{self, DynAggregatorSelector};

pub(crate) type AccumulatorId = u64;

static NEXT_ACCUMULATOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Evict a record once it has gone this many consecutive collections
    /// without an update. `None` keeps records for the accumulator lifetime.
    #[serde(default)]
    pub stale_after_cycles: Option<u32>,
}

pub(crate) type AsyncCallback = Arc<dyn Fn(&Accumulator) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct AsyncRunner {
    pub(crate) name: String,
    pub(crate) callback: AsyncCallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    instrument: InstrumentId,
    attributes: AttributeSet,
}

struct RecordState {
    current: BoxedAggregator,
    checkpoint: BoxedAggregator,
    dirty: bool,
    idle_cycles: u32,
    // Set under the lock when the record is evicted; writers holding a stale
    // Arc must re-resolve.
    retired: bool,
}

struct Record {
    instrument: Arc<InstrumentCore>,
    attributes: AttributeSet,
    state: Mutex<RecordState>,
}

impl Record {
    fn key(&self) -> RecordKey {
        RecordKey {
            instrument: self.instrument.id,
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateMode {
    Accumulate,
    Replace,
}

pub struct Accumulator {
    id: AccumulatorId,
    config: AccumulatorConfig,
    processor: DynProcessor,
    selector: DynAggregatorSelector,
    error_handler: DynErrorHandler,
    instruments: Mutex<HashMap<String, Arc<InstrumentCore>>>,
    next_instrument_id: AtomicU64,
    records: DashMap<RecordKey, Arc<Record>>,
    callbacks: Mutex<Vec<AsyncRunner>>,
    collect_lock: Mutex<()>,
    collections: AtomicU64,
}

impl Accumulator {
    pub fn builder() -> AccumulatorBuilder {
        AccumulatorBuilder::default()
    }

    pub fn new(processor: DynProcessor) -> Arc<Self> {
        Self::builder().build(processor)
    }

    /// Runs observer callbacks, then checkpoints every record updated since
    /// the previous cycle. Returns the number of records exported.
    pub fn collect(&self) -> usize {
        let _guard = self.collect_lock.lock();
        let cycle = self.collections.fetch_add(1, Ordering::Relaxed) + 1;

        self.run_callbacks();

        let records: Vec<Arc<Record>> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut exported = 0;
        for record in &records {
            if self.checkpoint_record(record) {
                exported += 1;
            }
        }

        debug!(
            cycle,
            exported,
            records = records.len(),
            "collection cycle complete"
        );
        exported
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn instrument_count(&self) -> usize {
        self.instruments.lock().len()
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub(crate) fn register_instrument(
        self: &Arc<Self>,
        descriptor: Descriptor,
    ) -> meter_core::Result<Arc<InstrumentCore>> {
        let mut instruments = self.instruments.lock();
        if let Some(existing) = instruments.get(descriptor.name()) {
            let same = existing.descriptor.instrument_kind() == descriptor.instrument_kind()
                && existing.descriptor.number_kind() == descriptor.number_kind();
            if !same {
                return Err(MetricsError::InstrumentConflict {
                    name: descriptor.name().to_string(),
                    existing_kind: existing.descriptor.instrument_kind(),
                    existing_number: existing.descriptor.number_kind(),
                });
            }
            return Ok(existing.clone());
        }

        let core = Arc::new(InstrumentCore {
            id: self.next_instrument_id.fetch_add(1, Ordering::Relaxed),
            accumulator_id: self.id,
            descriptor,
            accumulator: Arc::downgrade(self),
        });
        debug!(
            instrument = core.descriptor.name(),
            kind = ?core.descriptor.instrument_kind(),
            "registered instrument"
        );
        instruments.insert(core.descriptor.name().to_string(), core.clone());
        Ok(core)
    }

    pub(crate) fn register_callback(&self, name: String, callback: AsyncCallback) {
        self.callbacks.lock().push(AsyncRunner { name, callback });
    }

    pub(crate) fn report(&self, err: MetricsError) {
        self.error_handler.handle(err);
    }

    pub(crate) fn record(
        &self,
        instrument: &Arc<InstrumentCore>,
        number: Number,
        attributes: &AttributeSet,
    ) {
        self.apply(instrument, number, attributes, UpdateMode::Accumulate)
    }

    pub(crate) fn observe(
        &self,
        instrument: &Arc<InstrumentCore>,
        number: Number,
        attributes: &AttributeSet,
    ) {
        self.apply(instrument, number, attributes, UpdateMode::Replace)
    }

    pub(crate) fn record_batch(
        &self,
        attributes: &AttributeSet,
        measurements: &[crate::instrument::Measurement],
    ) {
        for measurement in measurements {
            match measurement.instrument() {
                Some(instrument) => self.record(instrument, measurement.number(), attributes),
                None => self.report(MetricsError::UninitializedInstrument),
            }
        }
    }

    fn apply(
        &self,
        instrument: &Arc<InstrumentCore>,
        number: Number,
        attributes: &AttributeSet,
        mode: UpdateMode,
    ) {
        if instrument.accumulator_id != self.id {
            self.report(MetricsError::UninitializedInstrument);
            return;
        }
        if let Err(err) = range_test(number, &instrument.descriptor) {
            self.report(err);
            return;
        }

        loop {
            let Some(record) = self.record_for(instrument, attributes) else {
                // Disabled by the selector.
                return;
            };

            let mut state = record.state.lock();
            if state.retired {
                continue;
            }

            if mode == UpdateMode::Replace {
                state.current.reset();
            }
            match state.current.update(number, &instrument.descriptor) {
                Ok(()) => {
                    state.dirty = true;
                    state.idle_cycles = 0;
                }
                Err(err) => self.report(err),
            }
            return;
        }
    }

    fn record_for(
        &self,
        instrument: &Arc<InstrumentCore>,
        attributes: &AttributeSet,
    ) -> Option<Arc<Record>> {
        let key = RecordKey {
            instrument: instrument.id,
            attributes: attributes.clone(),
        };
        if let Some(record) = self.records.get(&key) {
            return Some(record.value().clone());
        }

        match self.records.entry(key) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (current, checkpoint) =
                    self.selector.aggregator_pair_for(&instrument.descriptor)?;
                let record = Arc::new(Record {
                    instrument: instrument.clone(),
                    attributes: attributes.clone(),
                    state: Mutex::new(RecordState {
                        current,
                        checkpoint,
                        dirty: false,
                        idle_cycles: 0,
                        retired: false,
                    }),
                });
                entry.insert(record.clone());
                Some(record)
            }
        }
    }

    fn run_callbacks(&self) {
        let runners: Vec<AsyncRunner> = self.callbacks.lock().clone();
        for runner in runners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (runner.callback)(self)));
            if outcome.is_err() {
                warn!(callback = %runner.name, "observer callback panicked");
                self.report(MetricsError::CallbackPanicked(runner.name.clone()));
            }
        }
    }

    /// Returns true when the record was checkpointed and accepted by the
    /// processor.
    fn checkpoint_record(&self, record: &Record) -> bool {
        let descriptor = &record.instrument.descriptor;
        let mut guard = record.state.lock();
        let state = &mut *guard;

        if state.retired {
            return false;
        }
        if !state.dirty {
            if let Some(limit) = self.config.stale_after_cycles {
                state.idle_cycles += 1;
                if state.idle_cycles >= limit {
                    state.retired = true;
                    self.records.remove(&record.key());
                    debug!(
                        instrument = descriptor.name(),
                        idle_cycles = state.idle_cycles,
                        "evicted stale record"
                    );
                }
            }
            return false;
        }

        state.dirty = false;
        if let Err(err) = state.current.move_into(&mut *state.checkpoint, descriptor) {
            self.report(err);
            return false;
        }

        let accumulation =
            Accumulation::new(descriptor, &record.attributes, &*state.checkpoint);
        match self.processor.process(accumulation) {
            Ok(()) => true,
            Err(err) => {
                self.report(err);
                false
            }
        }
    }
}

#[derive(Default)]
pub struct AccumulatorBuilder {
    selector: Option<DynAggregatorSelector>,
    error_handler: Option<DynErrorHandler>,
    config: AccumulatorConfig,
}

impl AccumulatorBuilder {
    pub fn selector(mut self, selector: DynAggregatorSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn error_handler(mut self, error_handler: DynErrorHandler) -> Self {
        self.error_handler = Some(error_handler);
        self
    }

    pub fn config(mut self, config: AccumulatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stale_after_cycles(mut self, cycles: u32) -> Self {
        self.config.stale_after_cycles = Some(cycles);
        self
    }

    pub fn build(self, processor: DynProcessor) -> Arc<Accumulator> {
        Arc::new(Accumulator {
            id: NEXT_ACCUMULATOR_ID.fetch_add(1, Ordering::Relaxed),
            config: self.config,
            processor,
            selector: self
                .selector
                .unwrap_or_else(|| Arc::new(selector::inexpensive())),
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(GlobalErrorHandler)),
            instruments: Mutex::new(HashMap::new()),
            next_instrument_id: AtomicU64::new(1),
            records: DashMap::new(),
            callbacks: Mutex::new(Vec::new()),
            collect_lock: Mutex::new(()),
            collections: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregators::Aggregation;
    use crate::instrument::{Counter, GaugeObserver, ObserverResult};
    use crate::meter::Meter;
    use crate::testing::{MemoryProcessor, RecordingErrorHandler, SuffixSelector};
    use meter_core::{KeyValue, Number};
    use std::sync::atomic::AtomicI64;

    struct Fixture {
        meter: Meter,
        processor: Arc<MemoryProcessor>,
        handler: Arc<RecordingErrorHandler>,
        selector: Arc<SuffixSelector>,
    }

    impl Fixture {
        fn accumulator(&self) -> &Arc<Accumulator> {
            self.meter.accumulator()
        }

        fn collect(&self) -> usize {
            self.processor.reset();
            self.accumulator().collect()
        }

        fn value(&self, key: &str) -> Option<f64> {
            self.processor.values().get(key).copied()
        }
    }

    fn fixture_with(builder: AccumulatorBuilder) -> Fixture {
        let processor = Arc::new(MemoryProcessor::new());
        let handler = Arc::new(RecordingErrorHandler::new());
        let selector = Arc::new(SuffixSelector::new());
        let accumulator = builder
            .selector(selector.clone())
            .error_handler(handler.clone())
            .build(processor.clone());
        Fixture {
            meter: Meter::new(accumulator),
            processor,
            handler,
            selector,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Accumulator::builder())
    }

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(key, value)
    }

    #[test]
    fn test_counter_rejects_negative() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        counter.add(-1, &[]);
        assert!(matches!(fx.handler.flush(), Some(MetricsError::NegativeInput)));
        assert_eq!(fx.handler.input_errors(), 1);
        assert_eq!(fx.collect(), 0);
        assert_eq!(fx.accumulator().record_count(), 0);

        counter.add(1, &[]);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/"), Some(1.0));
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_up_down_counter_accepts_both_signs() {
        let fx = fixture();
        let counter = fx.meter.new_up_down_counter::<f64>("name.sum").unwrap();

        counter.add(f64::NAN, &[]);
        assert!(matches!(fx.handler.flush(), Some(MetricsError::NaNInput)));
        assert_eq!(fx.collect(), 0);

        counter.add(1.0, &[]);
        counter.add(-1.5, &[]);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/"), Some(-0.5));
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_histogram_input_range() {
        let fx = fixture();
        let histogram = fx.meter.new_histogram::<f64>("name.minmaxsumcount").unwrap();

        histogram.record(f64::NAN, &[]);
        assert!(matches!(fx.handler.flush(), Some(MetricsError::NaNInput)));
        assert_eq!(fx.collect(), 0);

        histogram.record(-1.0, &[]);
        histogram.record(2.0, &[]);
        assert_eq!(fx.collect(), 1);
        match fx.processor.aggregation("name.minmaxsumcount/") {
            Some(Aggregation::MinMaxSumCount { min, max, sum, count }) => {
                assert_eq!(count, 2);
                assert_eq!(min.as_f64(), -1.0);
                assert_eq!(max.as_f64(), 2.0);
                assert_eq!(sum.as_f64(), 1.0);
            }
            other => panic!("unexpected aggregation {:?}", other),
        }
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_disabled_instrument() {
        let fx = fixture();
        let histogram = fx.meter.new_histogram::<f64>("name.disabled").unwrap();

        histogram.record(-1.0, &[]);
        assert_eq!(fx.collect(), 0);
        assert!(fx.processor.values().is_empty());
        assert_eq!(fx.accumulator().record_count(), 0);
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_nan_is_rejected_everywhere() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<f64>("c.sum").unwrap();
        let updown = fx.meter.new_up_down_counter::<f64>("u.sum").unwrap();
        let histogram = fx.meter.new_histogram::<f64>("h.histogram").unwrap();

        counter.add(f64::NAN, &[]);
        updown.add(f64::NAN, &[]);
        histogram.record(f64::NAN, &[]);

        assert_eq!(fx.handler.count(), 3);
        assert!(matches!(fx.handler.flush(), Some(MetricsError::NaNInput)));
        assert_eq!(fx.collect(), 0);
    }

    #[test]
    fn test_duplicate_attributes_last_wins() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        counter.add(1, &[kv("A", "B"), kv("A", "C")]);
        counter.add(1, &[kv("A", "C")]);

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/A=C"), Some(2.0));
    }

    #[test]
    fn test_attribute_order_is_irrelevant() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        counter.add(1, &[kv("A", "B"), kv("C", "D")]);
        counter.add(2, &[kv("C", "D"), kv("A", "B")]);

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/A=B,C=D"), Some(3.0));
    }

    #[test]
    fn test_observer_collection() {
        let fx = fixture();
        let mult = Arc::new(AtomicI64::new(1));

        let m = mult.clone();
        fx.meter
            .new_gauge_observer::<f64, _>("float.gaugeobserver.lastvalue", move |result| {
                let mult = m.load(Ordering::SeqCst) as f64;
                result.observe(mult, &[kv("A", "B")]);
                result.observe(-mult, &[kv("A", "B")]);
                result.observe(-mult, &[kv("C", "D")]);
            })
            .unwrap();

        let m = mult.clone();
        fx.meter
            .new_counter_observer::<i64, _>("int.counterobserver.sum", move |result| {
                let mult = m.load(Ordering::SeqCst);
                result.observe(2 * mult, &[kv("A", "B")]);
                result.observe(mult, &[kv("C", "D")]);
            })
            .unwrap();

        let m = mult.clone();
        fx.meter
            .new_up_down_counter_observer::<f64, _>("float.updowncounterobserver.sum", move |result| {
                let mult = m.load(Ordering::SeqCst) as f64;
                result.observe(2.0 * mult, &[kv("A", "B")]);
                result.observe(-mult, &[kv("A", "B")]);
            })
            .unwrap();

        for cycle in 1..=3i64 {
            mult.store(cycle, Ordering::SeqCst);
            assert_eq!(fx.collect(), 5);

            let m = cycle as f64;
            assert_eq!(fx.value("float.gaugeobserver.lastvalue/A=B"), Some(-m));
            assert_eq!(fx.value("float.gaugeobserver.lastvalue/C=D"), Some(-m));
            assert_eq!(fx.value("int.counterobserver.sum/A=B"), Some(2.0 * m));
            assert_eq!(fx.value("int.counterobserver.sum/C=D"), Some(m));
            assert_eq!(fx.value("float.updowncounterobserver.sum/A=B"), Some(-m));
        }
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_counter_observer_input_range() {
        let fx = fixture();
        fx.meter
            .new_counter_observer::<f64, _>("float.counterobserver.sum", |result| {
                result.observe(-2.0, &[kv("A", "D")]);
            })
            .unwrap();
        fx.meter
            .new_counter_observer::<i64, _>("int.counterobserver.sum", |result| {
                result.observe(-1, &[kv("A", "E")]);
            })
            .unwrap();

        assert_eq!(fx.collect(), 0);
        assert_eq!(fx.handler.count(), 2);
        assert!(matches!(fx.handler.flush(), Some(MetricsError::NegativeInput)));
        assert!(fx.processor.values().is_empty());
    }

    #[test]
    fn test_up_down_counter_observer_accepts_negative() {
        let fx = fixture();
        fx.meter
            .new_up_down_counter_observer::<i64, _>("int.updowncounterobserver.sum", |result| {
                result.observe(-1, &[]);
            })
            .unwrap();

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("int.updowncounterobserver.sum/"), Some(-1.0));
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_batch_observer() {
        let fx = fixture();
        let mut batch = fx.meter.batch_observer();
        let float_gauge = batch
            .new_gauge_observer::<f64>("float.gaugeobserver.lastvalue")
            .unwrap();
        let int_gauge = batch
            .new_gauge_observer::<i64>("int.gaugeobserver.lastvalue")
            .unwrap();
        let float_sum = batch
            .new_counter_observer::<f64>("float.counterobserver.sum")
            .unwrap();
        let int_updown = batch
            .new_up_down_counter_observer::<i64>("int.updowncounterobserver.sum")
            .unwrap();
        let unbound = GaugeObserver::<i64>::default();

        batch.register(move |result| {
            result.observe(
                &[kv("A", "B")],
                &[
                    float_gauge.observation(1.0),
                    float_gauge.observation(-1.0),
                    int_gauge.observation(-1),
                    int_gauge.observation(1),
                    float_sum.observation(1000.0),
                    int_updown.observation(-100),
                ],
            );
            result.observe(
                &[kv("C", "D")],
                &[
                    float_gauge.observation(-1.0),
                    float_sum.observation(1000.0),
                    int_updown.observation(100),
                ],
            );
            result.observe(&[], &[int_gauge.observation(1), unbound.observation(1)]);
        });

        assert_eq!(fx.collect(), 8);
        assert!(matches!(
            fx.handler.flush(),
            Some(MetricsError::UninitializedInstrument)
        ));

        let expected = [
            ("float.gaugeobserver.lastvalue/A=B", -1.0),
            ("float.gaugeobserver.lastvalue/C=D", -1.0),
            ("int.gaugeobserver.lastvalue/A=B", 1.0),
            ("int.gaugeobserver.lastvalue/", 1.0),
            ("float.counterobserver.sum/A=B", 1000.0),
            ("float.counterobserver.sum/C=D", 1000.0),
            ("int.updowncounterobserver.sum/A=B", -100.0),
            ("int.updowncounterobserver.sum/C=D", 100.0),
        ];
        let values = fx.processor.values();
        assert_eq!(values.len(), expected.len());
        for (key, value) in expected {
            assert_eq!(values.get(key), Some(&value), "{}", key);
        }
    }

    #[test]
    fn test_record_batch() {
        let fx = fixture();
        let int_counter = fx.meter.new_counter::<i64>("int.sum").unwrap();
        let float_counter = fx.meter.new_counter::<f64>("float.sum").unwrap();
        let int_histogram = fx.meter.new_histogram::<i64>("int.histogram").unwrap();
        let float_histogram = fx.meter.new_histogram::<f64>("float.histogram").unwrap();

        fx.meter.record_batch(
            &[kv("A", "B"), kv("C", "D")],
            &[
                int_counter.measurement(1),
                float_counter.measurement(2.0),
                int_histogram.measurement(3),
                float_histogram.measurement(4.0),
                int_counter.measurement(-5),
                Counter::<i64>::default().measurement(1),
            ],
        );

        assert_eq!(fx.handler.count(), 2);
        assert_eq!(fx.collect(), 4);

        let values = fx.processor.values();
        assert_eq!(values.get("int.sum/A=B,C=D"), Some(&1.0));
        assert_eq!(values.get("float.sum/A=B,C=D"), Some(&2.0));
        assert_eq!(values.get("int.histogram/A=B,C=D"), Some(&3.0));
        assert_eq!(values.get("float.histogram/A=B,C=D"), Some(&4.0));
    }

    #[test]
    fn test_record_persistence() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<f64>("name.sum").unwrap();

        for _ in 0..100 {
            counter.add(1.0, &[kv("A", "B")]);
            assert_eq!(fx.collect(), 1);
        }

        assert_eq!(fx.selector.allocations(), 2);
        assert_eq!(fx.accumulator().record_count(), 1);
    }

    #[test]
    fn test_clean_records_are_skipped() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        counter.add(1, &[]);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.collect(), 0);
        assert_eq!(fx.accumulator().record_count(), 1);
    }

    #[test]
    fn test_handles_from_another_accumulator() {
        let fx = fixture();
        let other = fixture();
        let foreign_counter = other.meter.new_counter::<i64>("foreign.sum").unwrap();
        let foreign_gauge = {
            let mut batch = other.meter.batch_observer();
            let gauge = batch.new_gauge_observer::<i64>("foreign.lastvalue").unwrap();
            batch.register(|_| {});
            gauge
        };

        fx.meter.record_batch(
            &[],
            &[
                foreign_counter.measurement(1),
                Counter::<i64>::default().measurement(1),
            ],
        );
        assert_eq!(fx.handler.count(), 2);

        fx.handler.reset();
        let mut batch = fx.meter.batch_observer();
        let own = batch.new_gauge_observer::<i64>("own.lastvalue").unwrap();
        batch.register(move |result| {
            result.observe(&[], &[foreign_gauge.observation(1), own.observation(2)]);
        });

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("own.lastvalue/"), Some(2.0));
        assert!(matches!(
            fx.handler.flush(),
            Some(MetricsError::UninitializedInstrument)
        ));
        assert_eq!(other.accumulator().record_count(), 0);
    }

    #[test]
    fn test_unbound_handle_uses_global_handler() {
        let global = Arc::new(RecordingErrorHandler::new());
        meter_core::set_error_handler(global.clone());

        Counter::<i64>::default().add(1, &[]);
        let err = global.flush();
        meter_core::handler::reset_error_handler();

        assert!(matches!(err, Some(MetricsError::UninitializedInstrument)));
    }

    #[test]
    fn test_sync_instrument_in_callback() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("counter.sum").unwrap();
        fx.meter
            .new_gauge_observer::<i64, _>("observer.lastvalue", move |result| {
                result.observe(10, &[]);
                counter.add(100, &[]);
            })
            .unwrap();

        assert_eq!(fx.collect(), 2);
        assert_eq!(fx.value("counter.sum/"), Some(100.0));
        assert_eq!(fx.value("observer.lastvalue/"), Some(10.0));
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let fx = fixture();
        fx.meter
            .new_gauge_observer::<i64, _>("broken.lastvalue", |_: &ObserverResult<i64>| {
                panic!("observer failure")
            })
            .unwrap();
        fx.meter
            .new_gauge_observer::<i64, _>("healthy.lastvalue", |result| {
                result.observe(7, &[]);
            })
            .unwrap();

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("healthy.lastvalue/"), Some(7.0));
        match fx.handler.flush() {
            Some(MetricsError::CallbackPanicked(name)) => assert_eq!(name, "broken.lastvalue"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_processor_error_is_not_counted() {
        let fx = fixture();
        fx.processor.fail_on("bad.sum");
        let bad = fx.meter.new_counter::<i64>("bad.sum").unwrap();
        let good = fx.meter.new_counter::<i64>("good.sum").unwrap();

        bad.add(1, &[]);
        good.add(1, &[]);

        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("good.sum/"), Some(1.0));
        assert!(matches!(fx.handler.flush(), Some(MetricsError::Processor(_))));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_record() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        counter.add(1, &[kv("A", "B")]);
                    }
                });
            }
        });

        assert_eq!(fx.accumulator().record_count(), 1);
        assert_eq!(fx.selector.allocations(), 2);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/A=B"), Some(8000.0));
    }

    #[test]
    fn test_recording_concurrent_with_collect() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();
        let accumulator = fx.accumulator().clone();
        let processor = fx.processor.clone();
        let total = Arc::new(AtomicI64::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let counter = counter.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        counter.add(1, &[]);
                    }
                });
            }
            let total = total.clone();
            let processor = processor.clone();
            let accumulator = accumulator.clone();
            scope.spawn(move || {
                for _ in 0..20 {
                    processor.reset();
                    if accumulator.collect() == 1 {
                        let value = processor.values().get("name.sum/").copied().unwrap();
                        total.fetch_add(value as i64, Ordering::SeqCst);
                    }
                }
            });
        });

        processor.reset();
        if accumulator.collect() == 1 {
            let value = processor.values().get("name.sum/").copied().unwrap();
            total.fetch_add(value as i64, Ordering::SeqCst);
        }
        assert_eq!(total.load(Ordering::SeqCst), 2000);
    }

    #[test]
    fn test_stale_records_are_evicted() {
        let fx = fixture_with(Accumulator::builder().stale_after_cycles(2));
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();

        counter.add(1, &[]);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.collect(), 0);
        assert_eq!(fx.accumulator().record_count(), 1);
        assert_eq!(fx.collect(), 0);
        assert_eq!(fx.accumulator().record_count(), 0);

        counter.add(3, &[]);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/"), Some(3.0));
        assert_eq!(fx.selector.allocations(), 4);
    }

    #[test]
    fn test_eviction_racing_with_writers_loses_nothing() {
        let fx = fixture_with(Accumulator::builder().stale_after_cycles(1));
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();
        let accumulator = fx.accumulator().clone();
        let processor = fx.processor.clone();
        let done = std::sync::atomic::AtomicBool::new(false);
        let total = AtomicI64::new(0);

        let drain = || {
            processor.reset();
            if accumulator.collect() == 1 {
                let value = processor.values().get("name.sum/").copied().unwrap();
                total.fetch_add(value as i64, Ordering::SeqCst);
            }
        };

        std::thread::scope(|scope| {
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    let counter = counter.clone();
                    scope.spawn(move || {
                        for _ in 0..5000 {
                            counter.add(1, &[]);
                        }
                    })
                })
                .collect();
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    drain();
                }
            });
            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        drain();
        assert_eq!(total.load(Ordering::SeqCst), 20_000);
        assert!(fx.handler.flush().is_none());
    }

    #[test]
    fn test_instrument_conflict() {
        let fx = fixture();
        let first = fx.meter.new_counter::<i64>("x.sum").unwrap();

        let err = fx.meter.new_histogram::<i64>("x.sum").unwrap_err();
        assert!(matches!(err, MetricsError::InstrumentConflict { .. }));
        let err = fx.meter.new_counter::<f64>("x.sum").unwrap_err();
        assert!(matches!(err, MetricsError::InstrumentConflict { .. }));

        let again = fx.meter.new_counter::<i64>("x.sum").unwrap();
        first.add(1, &[]);
        again.add(2, &[]);

        assert_eq!(fx.accumulator().instrument_count(), 1);
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("x.sum/"), Some(3.0));
    }

    #[test]
    fn test_direct_record_path() {
        let fx = fixture();
        let counter = fx.meter.new_counter::<i64>("name.sum").unwrap();
        let core = counter.measurement(0).instrument().cloned().unwrap();

        fx.accumulator()
            .record(&core, Number::from_i64(4), &AttributeSet::empty());
        assert_eq!(fx.collect(), 1);
        assert_eq!(fx.value("name.sum/"), Some(4.0));
        assert_eq!(fx.accumulator().collections(), 1);
    }
}
