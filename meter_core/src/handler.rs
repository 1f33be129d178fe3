use parking_lot::RwLock;
use std::sync::Arc;
use tracing::error;

use crate::error::MetricsError;

pub trait ErrorHandler: Send + Sync {
    fn handle(&self, err: MetricsError);
}

impl<F> ErrorHandler for F
where
    F: Fn(MetricsError) + Send + Sync,
{
    fn handle(&self, err: MetricsError) {
        self(err)
    }
}

pub type DynErrorHandler = Arc<dyn ErrorHandler>;

static GLOBAL_HANDLER: RwLock<Option<DynErrorHandler>> = parking_lot::const_rwlock(None);

/// Installs the process-wide handler, replacing the previous one.
pub fn set_error_handler(handler: DynErrorHandler) {
    *GLOBAL_HANDLER.write() = Some(handler);
}

pub fn reset_error_handler() {
    *GLOBAL_HANDLER.write() = None;
}

pub fn handle_error(err: MetricsError) {
    let handler = GLOBAL_HANDLER.read().clone();
    match handler {
        Some(handler) => handler.handle(err),
        None => error!("metrics error: {}", err),
    }
}

/// Forwards to the process-wide handler at the time of each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalErrorHandler;

impl ErrorHandler for GlobalErrorHandler {
    fn handle(&self, err: MetricsError) {
        handle_error(err)
    }
}
