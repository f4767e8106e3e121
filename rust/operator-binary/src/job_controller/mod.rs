//! Access to the jobs running inside a Flink cluster.
//!
//! The [`JobController`] is the only way the observers and the reconciler talk to Flink. The
//! production implementation is [`FlinkService`], which combines the Flink REST API of a cluster
//! ([`rest::RestClusterClient`]) with the Kubernetes API ([`kubernetes::KubernetesClusterDeployments`]).
pub mod flink_service;
pub mod kubernetes;
pub mod rest;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use snafu::Snafu;
use stackable_flink_crd::{
    flink_config::{FlinkConfig, SAVEPOINT_DIRECTORY},
    status::{SavepointInfo, SavepointTriggerType},
    UpgradeMode,
};

pub use flink_service::FlinkService;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("configuration key [{key}] must be set to talk to the Flink cluster"))]
    MissingClusterConfig { key: &'static str },

    #[snafu(display(
        "config key[{SAVEPOINT_DIRECTORY}] must be set to take a savepoint of job {job_id}"
    ))]
    MissingSavepointDirectory { job_id: String },

    #[snafu(display("failed to create the REST client for Flink cluster [{cluster_id}]"))]
    CreateClusterClient {
        source: rest::Error,
        cluster_id: String,
    },

    #[snafu(display("failed to cancel job {job_id}"))]
    CancelJob { source: rest::Error, job_id: String },

    #[snafu(display("failed to stop job {job_id} with a savepoint"))]
    StopWithSavepoint { source: rest::Error, job_id: String },

    #[snafu(display("failed to trigger a savepoint for job {job_id}"))]
    TriggerSavepoint { source: rest::Error, job_id: String },

    #[snafu(display("failed to fetch the savepoint status of trigger {trigger_id}"))]
    FetchSavepointInfo {
        source: rest::Error,
        trigger_id: String,
    },

    #[snafu(display("failed to list the jobs of Flink cluster [{cluster_id}]"))]
    ListJobs {
        source: rest::Error,
        cluster_id: String,
    },

    #[snafu(display("failed to delete the JobManager deployment [{namespace}/{name}]"))]
    DeleteClusterDeployment {
        source: stackable_operator::kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to retrieve the JobManager deployment [{namespace}/{name}]"))]
    GetClusterDeployment {
        source: stackable_operator::client::Error,
        namespace: String,
        name: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A job as reported by the Flink cluster
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobStatusMessage {
    /// Hex representation of the Flink job id
    pub job_id: String,
    pub job_name: String,
    /// Flink job state name, e.g. `RUNNING`
    pub job_state: String,
    /// Epoch milliseconds
    pub start_time: i64,
}

/// Resolution of an asynchronous savepoint operation
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SavepointFetchResult {
    Pending,
    Completed { location: String },
    Failed { cause: String },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobController: Send + Sync {
    /// Stops the job using the given upgrade mode. Returns the savepoint location when the job
    /// was stopped with a savepoint.
    async fn cancel_job(
        &self,
        job_id: &str,
        upgrade_mode: UpgradeMode,
        conf: &FlinkConfig,
    ) -> Result<Option<String>>;

    /// Triggers a savepoint without waiting for it. The pending trigger is recorded in
    /// `savepoint_info` and its id is returned.
    async fn trigger_savepoint(
        &self,
        job_id: &str,
        trigger_type: SavepointTriggerType,
        savepoint_info: &mut SavepointInfo,
        conf: &FlinkConfig,
    ) -> Result<String>;

    async fn fetch_savepoint_info(
        &self,
        trigger_id: &str,
        job_id: &str,
        conf: &FlinkConfig,
    ) -> Result<SavepointFetchResult>;

    async fn list_jobs(&self, conf: &FlinkConfig) -> Result<Vec<JobStatusMessage>>;
}
