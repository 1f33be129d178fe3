pub mod attribute;
pub mod descriptor;
pub mod error;
pub mod handler;
pub mod number;

pub use attribute::{AttributeSet, DefaultEncoder, Encoder, EncoderId, Key, KeyValue, Value};
pub use descriptor::{Descriptor, InstrumentKind};
pub use error::{MetricsError, Result};
pub use handler::{handle_error, set_error_handler, DynErrorHandler, ErrorHandler, GlobalErrorHandler};
pub use number::{range_test, Number, NumberKind, NumberValue};
