use thiserror::Error;

use crate::descriptor::{InstrumentKind, NumberKind};

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("negative value is out of range for this instrument")]
    NegativeInput,

    #[error("NaN value is an invalid input")]
    NaNInput,

    #[error("use of an uninitialized instrument")]
    UninitializedInstrument,

    #[error("instrument '{name}' already registered as {existing_kind:?}/{existing_number:?}")]
    InstrumentConflict {
        name: String,
        existing_kind: InstrumentKind,
        existing_number: NumberKind,
    },

    #[error("inconsistent aggregator types: {0}")]
    InconsistentAggregator(String),

    #[error("no data collected by this aggregator")]
    NoData,

    #[error("observer callback '{0}' panicked")]
    CallbackPanicked(String),

    #[error("processor error: {0}")]
    Processor(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MetricsError {
    /// Returns true for the errors raised by input validation on the
    /// instrumentation path.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            MetricsError::NegativeInput
                | MetricsError::NaNInput
                | MetricsError::UninitializedInstrument
        )
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;
