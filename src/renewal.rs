// Renewal loop - keeps a held lease alive and ties the workload's life to it

use crate::{
    gateway::LeaseGateway,
    handler::ErrorHandlers,
    lock::{HeldLease, LockState},
    workload::{Worker, Workload},
    Result,
};
use tracing::{debug, info};

impl HeldLease {
    /// Runs `workload` for as long as this lease can be renewed.
    ///
    /// Sleeps a renewal interval between attempts. The first refused renewal
    /// aborts the workload and returns `Ok`. A store failure returns `Err`;
    /// the workload is aborted on that path too.
    pub async fn run_while_held(
        self,
        gateway: &LeaseGateway,
        workload: &dyn Workload,
        handlers: &ErrorHandlers,
    ) -> Result<()> {
        let interval = gateway.timer().renewal_interval();
        let worker = Worker::spawn(workload, handlers.clone());

        let mut lease = self;
        loop {
            tokio::time::sleep(interval).await;

            match gateway.renew(&lease).await? {
                LockState::Held(renewed) => {
                    debug!(locked_until = %renewed.expiry(), "lease renewed");
                    lease = renewed;
                }
                LockState::NotHeld { competitor_expiry } => {
                    info!(%competitor_expiry, "lease lost, terminating workload");
                    break;
                }
            }
        }

        worker.terminate(interval).await;
        Ok(())
    }
}

impl LockState {
    /// Like [`HeldLease::run_while_held`]; without the lease nothing runs.
    pub async fn run_while_held(
        self,
        gateway: &LeaseGateway,
        workload: &dyn Workload,
        handlers: &ErrorHandlers,
    ) -> Result<()> {
        match self {
            LockState::Held(lease) => lease.run_while_held(gateway, workload, handlers).await,
            LockState::NotHeld { .. } => Ok(()),
        }
    }
}
