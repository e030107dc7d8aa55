//! Scheduler layer for the manager
//!
//! Background work that runs independently of API requests:
//! - `registration`: the single-consumer install/register queue
//! - `reconcile`: the startup sweep and the periodic sweep plus GitHub check
//!
//! Neither loop lets one runner's failure stop the processing of others.

pub mod reconcile;
pub mod registration;

pub use reconcile::{ReconcileSettings, Reconciler};
pub use registration::{
    QueueError, RegistrationJob, RegistrationQueue, RegistrationWorker, ScriptSettings,
    registration_channel,
};

use async_trait::async_trait;
use fleet_core::domain::runner::RunnerIdentity;

use crate::service::ControlError;

/// Starts a runner once background work has made it ready
#[async_trait]
pub trait RunnerStarter: Send + Sync {
    async fn start_runner(&self, runner: &RunnerIdentity) -> Result<(), ControlError>;
}
