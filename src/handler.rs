use crate::Error;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Callback invoked with every error the coordinator recovers from.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// The handlers registered on one coordinator, fixed at construction.
#[derive(Clone)]
pub struct ErrorHandlers {
    handlers: Arc<[ErrorHandler]>,
}

impl ErrorHandlers {
    pub fn new(handlers: Vec<ErrorHandler>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Calls each handler once with `err`.
    ///
    /// A panicking handler is logged and skipped; the others still run.
    pub fn notify(&self, err: &Error) {
        for (index, handler) in self.handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                warn!(handler = index, "error handler panicked");
            }
        }
    }
}

impl Default for ErrorHandlers {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for ErrorHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandlers")
            .field("len", &self.handlers.len())
            .finish()
    }
}
