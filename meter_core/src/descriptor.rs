use serde::{Deserialize, Serialize};

pub use crate::number::NumberKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    Histogram,
    GaugeObserver,
    CounterObserver,
    UpDownCounterObserver,
}

impl InstrumentKind {
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::UpDownCounter | InstrumentKind::Histogram
        )
    }

    pub fn is_asynchronous(&self) -> bool {
        !self.is_synchronous()
    }

    /// Sum-like instruments: the reported value is a total, not a sample.
    pub fn is_adding(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter
                | InstrumentKind::UpDownCounter
                | InstrumentKind::CounterObserver
                | InstrumentKind::UpDownCounterObserver
        )
    }

    pub fn is_monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::CounterObserver
        )
    }

    /// Asynchronous sums report an absolute total each cycle rather than a
    /// delta since the previous one.
    pub fn is_precomputed_sum(&self) -> bool {
        self.is_adding() && self.is_asynchronous()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    name: String,
    instrument_kind: InstrumentKind,
    number_kind: NumberKind,
    #[serde(default)]
    description: String,
    #[serde(default)]
    unit: String,
}

impl Descriptor {
    pub fn new(
        name: impl Into<String>,
        instrument_kind: InstrumentKind,
        number_kind: NumberKind,
    ) -> Self {
        Self {
            name: name.into(),
            instrument_kind,
            number_kind,
            description: String::new(),
            unit: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instrument_kind(&self) -> InstrumentKind {
        self.instrument_kind
    }

    pub fn number_kind(&self) -> NumberKind {
        self.number_kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }
}
