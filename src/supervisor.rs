// Process supervisor - the long-lived task that competes for the lease forever

use crate::{
    config::{CoordinatorConfig, RestartPolicy},
    gateway::LeaseGateway,
    handler::ErrorHandlers,
    lock::LockState,
    store::LeaseStore,
    time::{Clock, LeaseTimer, SystemClock},
    workload::Workload,
    Error, Result,
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, Dispatch, Instrument};
use uuid::Uuid;

/// Runs a workload on at most one process at a time, for one lock key.
///
/// Every process that wants to run the job builds a `Coordinator` with the
/// same name against the same store and calls [`Coordinator::run`]. The
/// returned task loops forever:
///
/// 1. try to take the lease;
/// 2. if taken, run the workload and renew until a renewal is refused,
///    then abort the workload;
/// 3. if not, sleep until the holder's lease should lapse (plus jitter).
///
/// Failures inside an iteration are logged, sent to the error handlers and
/// followed by a restart according to the [`RestartPolicy`].
#[derive(Debug, Clone)]
pub struct Coordinator {
    id: Uuid,
    gateway: LeaseGateway,
    handlers: ErrorHandlers,
    restart_policy: RestartPolicy,
    logger: Option<Dispatch>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn LeaseStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CoordinatorConfig,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let timer = LeaseTimer::new(config.lease_duration, clock);
        Ok(Self {
            id: Uuid::new_v4(),
            handlers: config.error_handlers(),
            restart_policy: config.restart_policy,
            logger: config.logger().cloned(),
            gateway: LeaseGateway::new(config.name, timer, store),
        })
    }

    /// Distinguishes this coordinator from others on the same key in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        self.gateway.key()
    }

    pub fn gateway(&self) -> &LeaseGateway {
        &self.gateway
    }

    /// Starts competing for the lease on a background task.
    ///
    /// Must be called from within a tokio runtime. The task never finishes on
    /// its own; stop it through the returned handle.
    pub fn run<W: Workload>(&self, workload: W) -> CoordinatorHandle {
        let dispatch = self
            .logger
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        let span = tracing::dispatcher::with_default(&dispatch, || {
            info_span!("unique_task", key = %self.name(), instance = %self.id)
        });

        let coordinator = self.clone();
        let task = tokio::spawn(
            coordinator
                .supervise(Arc::new(workload))
                .instrument(span)
                .with_subscriber(dispatch),
        );

        CoordinatorHandle { task }
    }

    /// One acquire attempt, followed by either a held run or a backoff sleep.
    pub async fn run_once(&self, workload: &dyn Workload) -> Result<()> {
        match self.gateway.acquire().await? {
            LockState::Held(lease) => {
                info!(locked_until = %lease.expiry(), "lease acquired, running workload");
                lease
                    .run_while_held(&self.gateway, workload, &self.handlers)
                    .await
            }
            LockState::NotHeld { competitor_expiry } => {
                let wait = self.gateway.timer().backoff_before_retry(competitor_expiry);
                debug!(%competitor_expiry, ?wait, "lease held elsewhere, backing off");
                tokio::time::sleep(wait).await;
                Ok(())
            }
        }
    }

    async fn supervise(self, workload: Arc<dyn Workload>) {
        loop {
            let err = match AssertUnwindSafe(self.run_once(workload.as_ref()))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => Error::panicked(payload),
            };

            error!(error = %err, "lease supervisor iteration crashed, restarting");
            self.handlers.notify(&err);

            let delay = self.restart_policy.delay();
            if delay.is_zero() {
                // A store that fails without awaiting would otherwise starve the runtime
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Handle to a running coordinator task.
///
/// Dropping the handle leaves the task running, like dropping a `JoinHandle`.
#[derive(Debug)]
pub struct CoordinatorHandle {
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Stops the coordinator without waiting. A running workload is aborted
    /// with it; the stored lease is left to expire.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Stops the coordinator and waits for its task to be torn down. A running
    /// workload is aborted with it and stops at its next `.await`.
    pub async fn shutdown(self) {
        self.task.abort();
        if let Err(err) = self.task.await {
            if err.is_panic() {
                error!(error = %err, "coordinator task panicked");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
