pub mod config;
pub mod controller;
pub mod exporter;
pub mod parser;

pub use config::{ControllerConfig, ControllerConfigBuilder, ControllerFile};
pub use controller::{PushController, PushControllerBuilder};
pub use exporter::{DynExporter, Exporter, LogExporter};
pub use parser::{parse_config_from_file, parse_config_from_str};
