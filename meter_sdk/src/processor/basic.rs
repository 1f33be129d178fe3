use chrono::{DateTime, Utc};
use meter_core::{AttributeSet, DefaultEncoder, Descriptor, MetricsError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{Accumulation, Processor};
use crate::aggregators::{Aggregation, AggregationKind, BoxedAggregator};
use crate::selector::DynAggregatorSelector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    /// Every export carries the totals since the processor started.
    #[default]
    Cumulative,
    /// Every export carries only what was checkpointed in the last cycle.
    Delta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub descriptor: Descriptor,
    pub attributes: AttributeSet,
    pub aggregation: Aggregation,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointSet {
    records: Vec<ExportRecord>,
}

impl CheckpointSet {
    pub fn iter(&self) -> std::slice::Iter<'_, ExportRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, name: &str, attributes: &AttributeSet) -> Option<&ExportRecord> {
        self.records
            .iter()
            .find(|record| record.descriptor.name() == name && &record.attributes == attributes)
    }
}

impl<'a> IntoIterator for &'a CheckpointSet {
    type Item = &'a ExportRecord;
    type IntoIter = std::slice::Iter<'a, ExportRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    name: String,
    attributes: AttributeSet,
}

struct StateValue {
    descriptor: Descriptor,
    aggregator: BoxedAggregator,
    updated_in: u64,
}

struct State {
    values: HashMap<StateKey, StateValue>,
    started: u64,
    finished: u64,
    process_start: DateTime<Utc>,
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
}

pub struct BasicProcessor {
    selector: DynAggregatorSelector,
    temporality: Temporality,
    state: Mutex<State>,
}

impl BasicProcessor {
    pub fn new(selector: DynAggregatorSelector, temporality: Temporality) -> Self {
        let now = Utc::now();
        Self {
            selector,
            temporality,
            state: Mutex::new(State {
                values: HashMap::new(),
                started: 0,
                finished: 0,
                process_start: now,
                interval_start: now,
                interval_end: now,
            }),
        }
    }

    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    pub fn start_collection(&self) {
        let mut state = self.state.lock();
        if state.started > state.finished {
            debug!(
                cycle = state.started,
                "previous collection was never finished"
            );
        }
        state.started += 1;
        state.interval_start = state.interval_end;
    }

    pub fn finish_collection(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.started == state.finished {
            return Err(MetricsError::Processor(
                "finish_collection called without start_collection".to_string(),
            ));
        }
        state.finished = state.started;
        state.interval_end = Utc::now();
        Ok(())
    }

    /// Records with nothing to report yet are left out.
    pub fn checkpoint_set(&self) -> CheckpointSet {
        let state = self.state.lock();
        let start_time = match self.temporality {
            Temporality::Cumulative => state.process_start,
            Temporality::Delta => state.interval_start,
        };

        let mut records = Vec::with_capacity(state.values.len());
        for (key, value) in &state.values {
            if self.temporality == Temporality::Delta && value.updated_in != state.finished {
                continue;
            }
            let aggregation = match value.aggregator.aggregation(&value.descriptor) {
                Ok(aggregation) => aggregation,
                Err(MetricsError::NoData) => continue,
                Err(err) => {
                    debug!(instrument = %key.name, error = %err, "skipping record");
                    continue;
                }
            };
            records.push(ExportRecord {
                descriptor: value.descriptor.clone(),
                attributes: key.attributes.clone(),
                aggregation,
                start_time,
                end_time: state.interval_end,
            });
        }
        let encoder = DefaultEncoder::new();
        records.sort_by_cached_key(|record| {
            (
                record.descriptor.name().to_string(),
                record.attributes.encoded(&encoder),
            )
        });
        CheckpointSet { records }
    }

    fn replaces(&self, descriptor: &Descriptor, kind: AggregationKind) -> bool {
        // Observers already report totals, last values have nothing to add up.
        self.temporality == Temporality::Delta
            || descriptor.instrument_kind().is_precomputed_sum()
            || kind == AggregationKind::LastValue
    }
}

impl Processor for BasicProcessor {
    fn process(&self, accumulation: Accumulation<'_>) -> Result<()> {
        let descriptor = accumulation.descriptor();
        let incoming = accumulation.aggregator();
        let key = StateKey {
            name: descriptor.name().to_string(),
            attributes: accumulation.attributes().clone(),
        };

        let mut state = self.state.lock();
        if state.started == state.finished {
            return Err(MetricsError::Processor(
                "process called outside start_collection/finish_collection".to_string(),
            ));
        }
        let cycle = state.started;
        if let Some(value) = state.values.get_mut(&key) {
            if value.descriptor.instrument_kind() != descriptor.instrument_kind()
                || value.descriptor.number_kind() != descriptor.number_kind()
            {
                return Err(MetricsError::Processor(format!(
                    "descriptor of '{}' changed between collections",
                    descriptor.name()
                )));
            }
            // A second accumulation in the same cycle always adds.
            if value.updated_in != cycle && self.replaces(descriptor, incoming.kind()) {
                value.aggregator.reset();
            }
            value.aggregator.merge(incoming, descriptor)?;
            value.updated_in = cycle;
            return Ok(());
        }

        let mut aggregator = self.selector.aggregator_for(descriptor).ok_or_else(|| {
            MetricsError::Processor(format!("no aggregator for '{}'", descriptor.name()))
        })?;
        aggregator.merge(incoming, descriptor)?;
        state.values.insert(
            key,
            StateValue {
                descriptor: descriptor.clone(),
                aggregator,
                updated_in: cycle,
            },
        );
        Ok(())
    }
}
