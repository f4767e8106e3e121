//! Folds the live state of Flink clusters and jobs back into the resource status.
pub mod deployment;
pub mod job_status;
pub mod savepoint;
pub mod session_job;

use snafu::Snafu;

use crate::job_controller;

pub use deployment::DeploymentObserver;
pub use job_status::{JobStatusObserver, TimeoutHandler};
pub use savepoint::SavepointObserver;
pub use session_job::SessionJobObserver;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to list the jobs of the Flink cluster"))]
    ListJobs { source: job_controller::Error },

    #[snafu(display("expected one job for JobID: {job_id}, but {count} found"))]
    MultipleJobsFound { job_id: String, count: usize },

    #[snafu(display("failed to fetch the status of savepoint {trigger_id}"))]
    FetchSavepointInfo {
        source: job_controller::Error,
        trigger_id: String,
    },

    #[snafu(display("failed to observe the JobManager deployment"))]
    ObserveClusterDeployment { source: job_controller::Error },

    #[snafu(display("failed to read the last reconciled spec"))]
    LastReconciledSpec {
        source: stackable_flink_crd::status::Error,
    },

    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
