//! Drives running jobs towards their desired spec through the [`JobController`].
//!
//! Deploying and restoring clusters is left to the cluster deployer, this module only records
//! which spec was applied and performs the job level transitions: stopping jobs on suspension or
//! upgrade, and triggering manual and periodic savepoints.
use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use stackable_flink_crd::{
    flink_config::FlinkConfig,
    session_job::{FlinkSessionJob, FlinkSessionJobSpec, FlinkSessionJobStatus},
    status::{
        FlinkDeploymentStatus, JobManagerDeploymentStatus, JobStatus, ReconciliationStatus,
        Savepoint, SavepointTriggerType, FLINK_JOB_STATE_SUSPENDED,
    },
    FlinkDeployment, FlinkDeploymentSpec, JobSpec, JobState,
};
use stackable_operator::kube::api::ObjectMeta;

use crate::{
    config_builder::{application_job_id, effective_config, FlinkConfigBuilder},
    job_controller::{self, JobController},
    util::now_millis,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read the last reconciled spec"))]
    LastReconciledSpec {
        source: stackable_flink_crd::status::Error,
    },

    #[snafu(display("failed to record the reconciled spec"))]
    RecordReconciledSpec {
        source: stackable_flink_crd::status::Error,
    },

    #[snafu(display("failed to stop job {job_id}"))]
    StopJob {
        source: job_controller::Error,
        job_id: String,
    },

    #[snafu(display("failed to trigger a {trigger_type} savepoint for job {job_id}"))]
    TriggerSavepoint {
        source: job_controller::Error,
        job_id: String,
        trigger_type: SavepointTriggerType,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub struct JobReconciler {
    job_controller: Arc<dyn JobController>,
    default_config: FlinkConfig,
}

impl JobReconciler {
    pub fn new(job_controller: Arc<dyn JobController>, default_config: FlinkConfig) -> Self {
        Self {
            job_controller,
            default_config,
        }
    }

    pub async fn reconcile_deployment(
        &self,
        deployment: &FlinkDeployment,
        status: &mut FlinkDeploymentStatus,
    ) -> Result<()> {
        let spec = &deployment.spec;
        let Some(last_spec) = status
            .reconciliation_status
            .deserialize_last_reconciled_spec::<FlinkDeploymentSpec>()
            .context(LastReconciledSpecSnafu)?
        else {
            tracing::info!("Recording the spec of the first deployment");
            return record_spec(&mut status.reconciliation_status, spec);
        };
        // The running cluster was configured with the last reconciled spec
        let last_conf =
            FlinkConfigBuilder::build_from(&deployment.metadata, &last_spec, &self.default_config);

        if without_savepoint_trigger(spec) != without_savepoint_trigger(&last_spec) {
            if let (Some(job), Some(last_job)) = (&spec.job, &last_spec.job) {
                let job_id = tracked_job_id(&status.job_status, &deployment.metadata);
                if self
                    .stop_job(job_id, job, last_job, &mut status.job_status, &last_conf)
                    .await?
                {
                    // Stopping the job of an application cluster shuts the cluster down
                    status.job_manager_deployment_status = JobManagerDeploymentStatus::Missing;
                }
            }
            return record_spec(&mut status.reconciliation_status, spec);
        }

        if let (Some(job), Some(last_job)) = (&spec.job, &last_spec.job) {
            if !self
                .reconcile_savepoints(job, last_job, &mut status.job_status, &last_conf)
                .await?
            {
                return Ok(());
            }
        }

        if *spec != last_spec {
            return record_spec(&mut status.reconciliation_status, spec);
        }
        let stable = match &spec.job {
            Some(_) => status.job_status.is_running(),
            None => status.job_manager_deployment_status == JobManagerDeploymentStatus::Ready,
        };
        mark_stable(&mut status.reconciliation_status, stable);
        Ok(())
    }

    /// Reconciles a session job against its session cluster, which has to exist.
    pub async fn reconcile_session_job(
        &self,
        session_job: &FlinkSessionJob,
        status: &mut FlinkSessionJobStatus,
        session: &FlinkDeployment,
    ) -> Result<()> {
        let spec = &session_job.spec;
        let Some(last_spec) = status
            .reconciliation_status
            .deserialize_last_reconciled_spec::<FlinkSessionJobSpec>()
            .context(LastReconciledSpecSnafu)?
        else {
            tracing::info!("Recording the spec of the first deployment");
            return record_spec(&mut status.reconciliation_status, spec);
        };
        let conf = effective_config(session, &self.default_config);

        if spec.cluster_id != last_spec.cluster_id
            || !spec.job.eq_ignoring_savepoint_trigger(&last_spec.job)
        {
            let job_id = tracked_job_id(&status.job_status, &session_job.metadata);
            self.stop_job(job_id, &spec.job, &last_spec.job, &mut status.job_status, &conf)
                .await?;
            return record_spec(&mut status.reconciliation_status, spec);
        }

        if !self
            .reconcile_savepoints(&spec.job, &last_spec.job, &mut status.job_status, &conf)
            .await?
        {
            return Ok(());
        }

        if *spec != last_spec {
            return record_spec(&mut status.reconciliation_status, spec);
        }
        mark_stable(
            &mut status.reconciliation_status,
            status.job_status.is_running(),
        );
        Ok(())
    }

    /// Stops the job deployed from `last_job` with the upgrade mode of the desired `job`. Returns
    /// whether a job was stopped.
    async fn stop_job(
        &self,
        job_id: Option<String>,
        job: &JobSpec,
        last_job: &JobSpec,
        job_status: &mut JobStatus,
        conf: &FlinkConfig,
    ) -> Result<bool> {
        if last_job.state != JobState::Running {
            return Ok(false);
        }
        let Some(job_id) = job_id else {
            tracing::warn!("No job is tracked, nothing to stop");
            return Ok(false);
        };

        let upgrade_mode = job.upgrade_mode;
        match job.state {
            JobState::Suspended => tracing::info!(job.id = %job_id, %upgrade_mode, "Suspending job"),
            JobState::Running => tracing::info!(job.id = %job_id, %upgrade_mode, "Upgrading job"),
        }
        let savepoint = self
            .job_controller
            .cancel_job(&job_id, upgrade_mode, conf)
            .await
            .context(StopJobSnafu { job_id: &job_id })?;
        if let Some(location) = savepoint {
            job_status.savepoint_info.update_last_savepoint(Savepoint::new(
                location,
                now_millis(),
                Some(SavepointTriggerType::Upgrade),
            ));
        }
        job_status.state = Some(FLINK_JOB_STATE_SUSPENDED.to_string());
        Ok(true)
    }

    /// Triggers manual and periodic savepoints of a running job. Returns `false` while a
    /// requested manual savepoint has to wait, so that the spec is not recorded yet and the
    /// request is retried.
    async fn reconcile_savepoints(
        &self,
        job: &JobSpec,
        last_job: &JobSpec,
        job_status: &mut JobStatus,
        conf: &FlinkConfig,
    ) -> Result<bool> {
        let manual_requested = job.savepoint_trigger_nonce != last_job.savepoint_trigger_nonce
            && job.manual_savepoint_requested();
        if job.state != JobState::Running {
            return Ok(true);
        }
        let job_id = match &job_status.job_id {
            Some(job_id) if job_status.is_running() => job_id.clone(),
            _ => return Ok(!manual_requested),
        };

        if job_status.savepoint_info.is_pending() {
            if manual_requested {
                tracing::info!(job.id = %job_id, "Savepoint in progress, deferring manual savepoint");
            }
            return Ok(!manual_requested);
        }

        let trigger_type = if manual_requested {
            SavepointTriggerType::Manual
        } else if periodic_savepoint_due(job_status, conf) {
            SavepointTriggerType::Periodic
        } else {
            return Ok(true);
        };
        let trigger_id = self
            .job_controller
            .trigger_savepoint(&job_id, trigger_type, &mut job_status.savepoint_info, conf)
            .await
            .context(TriggerSavepointSnafu {
                job_id: &job_id,
                trigger_type,
            })?;
        tracing::info!(job.id = %job_id, trigger.id = %trigger_id, %trigger_type, "Savepoint triggered");
        Ok(true)
    }
}

fn periodic_savepoint_due(job_status: &JobStatus, conf: &FlinkConfig) -> bool {
    let Some(interval) = conf.periodic_savepoint_interval() else {
        return false;
    };
    let interval_millis = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    // Without any savepoint the interval counts from the start of the job
    let since = job_status
        .savepoint_info
        .last_savepoint
        .as_ref()
        .map(|savepoint| savepoint.time_stamp)
        .or_else(|| job_status.start_time.as_deref()?.parse().ok());
    since.map_or(true, |since| {
        now_millis().saturating_sub(since) >= interval_millis
    })
}

fn tracked_job_id(job_status: &JobStatus, meta: &ObjectMeta) -> Option<String> {
    job_status
        .job_id
        .clone()
        .or_else(|| application_job_id(meta))
}

fn without_savepoint_trigger(spec: &FlinkDeploymentSpec) -> FlinkDeploymentSpec {
    let mut spec = spec.clone();
    if let Some(job) = spec.job.as_mut() {
        job.savepoint_trigger_nonce = None;
    }
    spec
}

fn record_spec(
    reconciliation_status: &mut ReconciliationStatus,
    spec: &impl serde::Serialize,
) -> Result<()> {
    reconciliation_status
        .serialize_and_set_last_reconciled_spec(spec, now_millis())
        .context(RecordReconciledSpecSnafu)
}

fn mark_stable(reconciliation_status: &mut ReconciliationStatus, stable: bool) {
    if stable && !reconciliation_status.is_last_reconciled_spec_stable() {
        tracing::info!("Marking the reconciled spec as stable");
        reconciliation_status.mark_reconciled_spec_as_stable();
    }
}
