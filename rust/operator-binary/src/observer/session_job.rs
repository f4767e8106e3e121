use std::sync::Arc;

use snafu::ResultExt;
use stackable_flink_crd::{
    flink_config::FlinkConfig,
    session_job::{FlinkSessionJob, FlinkSessionJobSpec, FlinkSessionJobStatus},
    status::JobManagerDeploymentStatus,
    FlinkDeployment, JobState,
};

use super::{JobStatusObserver, LastReconciledSpecSnafu, Result, SavepointObserver};
use crate::{
    config_builder::{application_job_id, effective_config},
    job_controller::JobController,
    operator_config::FlinkOperatorConfig,
};

pub struct SessionJobObserver {
    job_status_observer: JobStatusObserver<()>,
    savepoint_observer: SavepointObserver,
    default_config: FlinkConfig,
}

impl SessionJobObserver {
    pub fn new(
        job_controller: Arc<dyn JobController>,
        operator_config: &FlinkOperatorConfig,
        default_config: FlinkConfig,
    ) -> Self {
        Self {
            // The session cluster is observed by its own FlinkDeployment
            job_status_observer: JobStatusObserver::new(
                job_controller.clone(),
                *operator_config.flink_client_timeout,
                |_: &mut ()| {},
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
        session_job: &FlinkSessionJob,
        status: &mut FlinkSessionJobStatus,
        session: Option<&FlinkDeployment>,
    ) -> Result<()> {
        let Some(last_spec) = status
            .reconciliation_status
            .deserialize_last_reconciled_spec::<FlinkSessionJobSpec>()
            .context(LastReconciledSpecSnafu)?
        else {
            tracing::debug!("Skipping observation of the first deployment");
            return Ok(());
        };
        if last_spec.job.state == JobState::Suspended {
            return Ok(());
        }

        let Some(session) = session.filter(|session| {
            session.status.as_ref().map(|status| status.job_manager_deployment_status)
                == Some(JobManagerDeploymentStatus::Ready)
        }) else {
            tracing::debug!(
                session.cluster = %last_spec.cluster_id,
                "Session cluster is not ready, skipping observation"
            );
            return Ok(());
        };

        let conf = effective_config(session, &self.default_config);
        if let Some(job_id) = application_job_id(&session_job.metadata) {
            status.job_status.track_job(job_id);
        }

        let job_found = self
            .job_status_observer
            .observe(&mut status.job_status, &conf, &mut ())
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
}
