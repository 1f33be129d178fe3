use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::descriptor::Descriptor;
use crate::error::{MetricsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    I64,
    F64,
}

/// Raw `i64` or `f64` bits; the kind lives on the descriptor.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Number(u64);

impl Number {
    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub fn from_f64(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn to_f64(self, kind: NumberKind) -> f64 {
        match kind {
            NumberKind::I64 => self.as_i64() as f64,
            NumberKind::F64 => self.as_f64(),
        }
    }

    pub fn is_nan(self, kind: NumberKind) -> bool {
        kind == NumberKind::F64 && self.as_f64().is_nan()
    }

    pub fn is_negative(self, kind: NumberKind) -> bool {
        match kind {
            NumberKind::I64 => self.as_i64() < 0,
            NumberKind::F64 => self.as_f64() < 0.0,
        }
    }

    pub fn add(self, other: Number, kind: NumberKind) -> Number {
        match kind {
            NumberKind::I64 => Number::from_i64(self.as_i64().wrapping_add(other.as_i64())),
            NumberKind::F64 => Number::from_f64(self.as_f64() + other.as_f64()),
        }
    }

    pub fn partial_cmp(self, other: Number, kind: NumberKind) -> Option<Ordering> {
        match kind {
            NumberKind::I64 => Some(self.as_i64().cmp(&other.as_i64())),
            NumberKind::F64 => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }

    pub fn display(self, kind: NumberKind) -> DisplayNumber {
        DisplayNumber(self, kind)
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Number({:#x})", self.0)
    }
}

pub struct DisplayNumber(Number, NumberKind);

impl fmt::Display for DisplayNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            NumberKind::I64 => write!(f, "{}", self.0.as_i64()),
            NumberKind::F64 => write!(f, "{}", self.0.as_f64()),
        }
    }
}

pub trait NumberValue: Copy + Send + Sync + 'static {
    const KIND: NumberKind;

    fn to_number(self) -> Number;
}

impl NumberValue for i64 {
    const KIND: NumberKind = NumberKind::I64;

    fn to_number(self) -> Number {
        Number::from_i64(self)
    }
}

impl NumberValue for f64 {
    const KIND: NumberKind = NumberKind::F64;

    fn to_number(self) -> Number {
        Number::from_f64(self)
    }
}

/// Validates `number` against the instrument it is recorded on. NaN is
/// always rejected for floats; monotonic instruments reject negative values.
pub fn range_test(number: Number, descriptor: &Descriptor) -> Result<()> {
    let kind = descriptor.number_kind();
    if number.is_nan(kind) {
        return Err(MetricsError::NaNInput);
    }
    if descriptor.instrument_kind().is_monotonic() && number.is_negative(kind) {
        return Err(MetricsError::NegativeInput);
    }
    Ok(())
}
