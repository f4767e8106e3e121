use std::sync::Arc;

use snafu::{OptionExt, ResultExt};
use stackable_flink_crd::{
    flink_config::FlinkConfig,
    status::{FlinkDeploymentStatus, JobManagerDeploymentStatus},
    FlinkDeployment, FlinkDeploymentSpec, JobState,
};
use stackable_operator::kube::ResourceExt;

use super::{
    JobStatusObserver, LastReconciledSpecSnafu, ObjectHasNoNamespaceSnafu,
    ObserveClusterDeploymentSnafu, Result, SavepointObserver,
};
use crate::{
    config_builder::{application_job_id, FlinkConfigBuilder},
    job_controller::{kubernetes::ClusterDeployments, JobController},
    operator_config::FlinkOperatorConfig,
};

/// Observes application and session clusters.
pub struct DeploymentObserver {
    deployments: Arc<dyn ClusterDeployments>,
    job_status_observer: JobStatusObserver<JobManagerDeploymentStatus>,
    savepoint_observer: SavepointObserver,
    default_config: FlinkConfig,
}

impl DeploymentObserver {
    pub fn new(
        job_controller: Arc<dyn JobController>,
        deployments: Arc<dyn ClusterDeployments>,
        operator_config: &FlinkOperatorConfig,
        default_config: FlinkConfig,
    ) -> Self {
        Self {
            deployments,
            job_status_observer: JobStatusObserver::new(
                job_controller.clone(),
                *operator_config.flink_client_timeout,
                |job_manager: &mut JobManagerDeploymentStatus| {
                    *job_manager = JobManagerDeploymentStatus::DeployedNotReady
                },
            ),
            savepoint_observer: SavepointObserver::new(
                job_controller,
                *operator_config.savepoint_trigger_grace_period,
            ),
            default_config,
        }
    }

    pub async fn observe(
        &self,
        deployment: &FlinkDeployment,
        status: &mut FlinkDeploymentStatus,
    ) -> Result<()> {
        let Some(last_spec) = status
            .reconciliation_status
            .deserialize_last_reconciled_spec::<FlinkDeploymentSpec>()
            .context(LastReconciledSpecSnafu)?
        else {
            tracing::debug!("Skipping observation of the first deployment");
            return Ok(());
        };

        let namespace = deployment.namespace().context(ObjectHasNoNamespaceSnafu)?;
        self.observe_job_manager_deployment(&namespace, &deployment.name_any(), status)
            .await?;
        if status.job_manager_deployment_status != JobManagerDeploymentStatus::Ready {
            return Ok(());
        }

        let Some(job) = &last_spec.job else {
            return Ok(());
        };
        if job.state == JobState::Suspended {
            return Ok(());
        }

        let conf =
            FlinkConfigBuilder::build_from(&deployment.metadata, &last_spec, &self.default_config);
        if let Some(job_id) = application_job_id(&deployment.metadata) {
            status.job_status.track_job(job_id);
        }

        let job_found = self
            .job_status_observer
            .observe(
                &mut status.job_status,
                &conf,
                &mut status.job_manager_deployment_status,
            )
            .await?;
        if let (true, Some(job_id)) = (job_found, status.job_status.job_id.clone()) {
            if let Some(error) = self
                .savepoint_observer
                .observe(&mut status.job_status.savepoint_info, &job_id, &conf)
                .await?
            {
                status.error = Some(error);
            }
        }
        Ok(())
    }

    /// A JobManager is only considered ready after its deployment was seen available on two
    /// consecutive observations.
    async fn observe_job_manager_deployment(
        &self,
        namespace: &str,
        name: &str,
        status: &mut FlinkDeploymentStatus,
    ) -> Result<()> {
        let previous = status.job_manager_deployment_status;
        if previous == JobManagerDeploymentStatus::Ready {
            return Ok(());
        }

        let observed = match self
            .deployments
            .cluster_deployment_ready(namespace, name)
            .await
            .context(ObserveClusterDeploymentSnafu)?
        {
            None => JobManagerDeploymentStatus::Missing,
            Some(false) => JobManagerDeploymentStatus::Deploying,
            Some(true) if previous == JobManagerDeploymentStatus::DeployedNotReady => {
                JobManagerDeploymentStatus::Ready
            }
            Some(true) => JobManagerDeploymentStatus::DeployedNotReady,
        };
        if observed != previous {
            tracing::info!(from = %previous, to = %observed, "JobManager deployment status changed");
        }
        status.job_manager_deployment_status = observed;
        Ok(())
    }
}
