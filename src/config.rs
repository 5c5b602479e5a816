// Per-coordinator configuration

use crate::{
    handler::{ErrorHandler, ErrorHandlers},
    time::DEFAULT_LEASE_DURATION,
    Error, Result,
};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Dispatch;

/// What the supervisor does after an iteration crashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Retry straight away; the crash itself already took time
    #[default]
    Immediate,
    /// Wait this long before the next attempt
    Delay(#[serde(deserialize_with = "duration_secs")] Duration),
}

impl RestartPolicy {
    pub fn delay(&self) -> Duration {
        match self {
            RestartPolicy::Immediate => Duration::ZERO,
            RestartPolicy::Delay(delay) => *delay,
        }
    }
}

/// Settings for one coordinator.
///
/// Deserializes from e.g. `{"name": "poller", "lease_duration": 10}`.
/// Error handlers and the logger can't be deserialized; add them with the
/// builder methods.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Lock key shared by every process competing for this job
    pub name: String,

    /// Lease duration in seconds
    #[serde(default = "default_lease_duration", deserialize_with = "duration_secs")]
    pub lease_duration: Duration,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(skip)]
    error_handlers: Vec<ErrorHandler>,

    #[serde(skip)]
    logger: Option<Dispatch>,
}

impl CoordinatorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lease_duration: DEFAULT_LEASE_DURATION,
            restart_policy: RestartPolicy::default(),
            error_handlers: Vec::new(),
            logger: None,
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_restart_policy(mut self, restart_policy: RestartPolicy) -> Self {
        self.restart_policy = restart_policy;
        self
    }

    /// Registers a callback for every error the coordinator recovers from.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Sends this coordinator's log events to `dispatch` instead of the
    /// subscriber that is current when it starts running.
    pub fn with_logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    pub fn error_handlers(&self) -> ErrorHandlers {
        ErrorHandlers::new(self.error_handlers.clone())
    }

    pub fn logger(&self) -> Option<&Dispatch> {
        self.logger.as_ref()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("lock name must not be empty".into()));
        }
        if self.lease_duration.is_zero() {
            return Err(Error::InvalidConfig("lease duration must be positive".into()));
        }
        // Keeps every derived deadline representable
        if self.lease_duration > Duration::from_secs(u64::from(u32::MAX)) {
            return Err(Error::InvalidConfig(format!(
                "lease duration {:?} is too long",
                self.lease_duration
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("name", &self.name)
            .field("lease_duration", &self.lease_duration)
            .field("restart_policy", &self.restart_policy)
            .field("error_handlers", &self.error_handlers.len())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

fn default_lease_duration() -> Duration {
    DEFAULT_LEASE_DURATION
}

fn duration_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
