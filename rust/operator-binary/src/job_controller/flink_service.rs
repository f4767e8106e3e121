use std::sync::Arc;

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt};
use stackable_flink_crd::{
    flink_config::{FlinkConfig, CLUSTER_ID, NAMESPACE},
    status::{SavepointInfo, SavepointTriggerType},
    UpgradeMode,
};

use super::{
    kubernetes::ClusterDeployments,
    rest::{self, ClusterClient, ClusterClientFactory},
    CancelJobSnafu, CreateClusterClientSnafu, FetchSavepointInfoSnafu, JobController,
    JobStatusMessage, ListJobsSnafu, MissingClusterConfigSnafu, MissingSavepointDirectorySnafu,
    Result, SavepointFetchResult, StopWithSavepointSnafu, TriggerSavepointSnafu,
};
use crate::util::now_millis;

/// [`JobController`] talking to the REST API of the JobManager and to Kubernetes.
pub struct FlinkService {
    clients: Arc<dyn ClusterClientFactory>,
    deployments: Arc<dyn ClusterDeployments>,
}

impl FlinkService {
    pub fn new(
        clients: Arc<dyn ClusterClientFactory>,
        deployments: Arc<dyn ClusterDeployments>,
    ) -> Self {
        Self {
            clients,
            deployments,
        }
    }

    fn cluster_client(&self, conf: &FlinkConfig) -> Result<Box<dyn ClusterClient>> {
        let (namespace, cluster_id) = cluster_coordinates(conf)?;
        rest::rest_endpoint(cluster_id, namespace, conf)
            .and_then(|endpoint| self.clients.cluster_client(endpoint))
            .context(CreateClusterClientSnafu { cluster_id })
    }
}

fn cluster_coordinates(conf: &FlinkConfig) -> Result<(&str, &str)> {
    let namespace = conf
        .namespace()
        .context(MissingClusterConfigSnafu { key: NAMESPACE })?;
    let cluster_id = conf
        .cluster_id()
        .context(MissingClusterConfigSnafu { key: CLUSTER_ID })?;
    Ok((namespace, cluster_id))
}

#[async_trait]
impl JobController for FlinkService {
    async fn cancel_job(
        &self,
        job_id: &str,
        upgrade_mode: UpgradeMode,
        conf: &FlinkConfig,
    ) -> Result<Option<String>> {
        match upgrade_mode {
            UpgradeMode::Stateless => {
                self.cluster_client(conf)?
                    .cancel(job_id)
                    .await
                    .context(CancelJobSnafu { job_id })?;
                tracing::info!(job.id = job_id, "Job cancelled");
                Ok(None)
            }
            UpgradeMode::Savepoint => {
                let savepoint_directory = conf
                    .savepoint_directory()
                    .context(MissingSavepointDirectorySnafu { job_id })?;
                let location = self
                    .cluster_client(conf)?
                    .stop_with_savepoint(job_id, false, savepoint_directory)
                    .await
                    .context(StopWithSavepointSnafu { job_id })?;
                tracing::info!(job.id = job_id, savepoint = %location, "Job stopped with savepoint");
                Ok(Some(location))
            }
            UpgradeMode::LastState => {
                // The job keeps running until its JobManager is gone and is recovered from the
                // high availability metadata afterwards.
                let (namespace, cluster_id) = cluster_coordinates(conf)?;
                self.deployments
                    .delete_cluster_deployment(namespace, cluster_id)
                    .await?;
                tracing::info!(job.id = job_id, "JobManager deployment removed, keeping job state");
                Ok(None)
            }
        }
    }

    async fn trigger_savepoint(
        &self,
        job_id: &str,
        trigger_type: SavepointTriggerType,
        savepoint_info: &mut SavepointInfo,
        conf: &FlinkConfig,
    ) -> Result<String> {
        let savepoint_directory = conf
            .savepoint_directory()
            .context(MissingSavepointDirectorySnafu { job_id })?;
        let trigger_id = self
            .cluster_client(conf)?
            .trigger_savepoint(job_id, savepoint_directory, false)
            .await
            .context(TriggerSavepointSnafu { job_id })?;
        tracing::info!(
            job.id = job_id,
            trigger.id = %trigger_id,
            trigger_type = %trigger_type,
            "Savepoint triggered"
        );
        savepoint_info.set_trigger(trigger_id.clone(), trigger_type, now_millis());
        Ok(trigger_id)
    }

    async fn fetch_savepoint_info(
        &self,
        trigger_id: &str,
        job_id: &str,
        conf: &FlinkConfig,
    ) -> Result<SavepointFetchResult> {
        self.cluster_client(conf)?
            .savepoint_status(job_id, trigger_id)
            .await
            .context(FetchSavepointInfoSnafu { trigger_id })
    }

    async fn list_jobs(&self, conf: &FlinkConfig) -> Result<Vec<JobStatusMessage>> {
        let client = self.cluster_client(conf)?;
        let (_, cluster_id) = cluster_coordinates(conf)?;
        client.list_jobs().await.context(ListJobsSnafu { cluster_id })
    }
}
