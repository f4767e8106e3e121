//! Keeps the status of each [`FlinkSessionJob`] in sync with the job running in its session
//! cluster.
use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use snafu::{OptionExt, ResultExt, Snafu};
use stackable_flink_crd::{
    session_job::{FlinkSessionJob, FlinkSessionJobStatus},
    FlinkDeployment, OPERATOR_NAME,
};
use stackable_operator::{
    kube::{
        core::{error_boundary, DeserializeGuard},
        runtime::controller::Action,
        ResourceExt,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    observer::{self, SessionJobObserver},
    operator_config::FlinkOperatorConfig,
    reconciler::{self, JobReconciler},
    validation::Validators,
};

pub const SESSION_JOB_CONTROLLER_NAME: &str = "flinksessionjob";
pub const SESSION_JOB_FULL_CONTROLLER_NAME: &str =
    concatcp!(SESSION_JOB_CONTROLLER_NAME, '.', OPERATOR_NAME);

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub validators: Arc<Validators>,
    pub observer: SessionJobObserver,
    pub reconciler: JobReconciler,
    pub operator_config: FlinkOperatorConfig,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("FlinkSessionJob object is invalid"))]
    InvalidFlinkSessionJob {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to get the session cluster {cluster_id}"))]
    GetSessionCluster {
        source: stackable_operator::client::Error,
        cluster_id: String,
    },

    #[snafu(display("session cluster {cluster_id} does not exist"))]
    MissingSessionCluster { cluster_id: String },

    #[snafu(display("failed to observe the session job"))]
    Observe { source: observer::Error },

    #[snafu(display("failed to reconcile the session job"))]
    Reconcile { source: reconciler::Error },

    #[snafu(display("failed to update status"))]
    ApplyStatus {
        source: stackable_operator::client::Error,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_session_job(
    session_job: Arc<DeserializeGuard<FlinkSessionJob>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let session_job = session_job
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidFlinkSessionJobSnafu)?;
    let namespace = session_job
        .namespace()
        .context(ObjectHasNoNamespaceSnafu)?;
    let cluster_id = &session_job.spec.cluster_id;
    let session = ctx
        .client
        .get_opt::<FlinkDeployment>(cluster_id, &namespace)
        .await
        .context(GetSessionClusterSnafu { cluster_id })?;

    let mut status = session_job.status.clone().unwrap_or_default();
    status.error = None;

    let result = observe_and_reconcile(session_job, &mut status, session.as_ref(), &ctx).await;
    if let Err(error) = &result {
        status.error = Some(error.to_string());
    }

    ctx.client
        .apply_patch_status(SESSION_JOB_FULL_CONTROLLER_NAME, session_job, &status)
        .await
        .context(ApplyStatusSnafu)?;

    result?;
    Ok(Action::requeue(requeue_interval(
        &status,
        &ctx.operator_config,
    )))
}

async fn observe_and_reconcile(
    session_job: &FlinkSessionJob,
    status: &mut FlinkSessionJobStatus,
    session: Option<&FlinkDeployment>,
    ctx: &Ctx,
) -> Result<()> {
    ctx.observer
        .observe(session_job, status, session)
        .await
        .context(ObserveSnafu)?;

    if let Some(validation_error) = ctx.validators.validate_session_job(session_job, session) {
        tracing::warn!(error = %validation_error, "Validation failed");
        status.error = Some(validation_error);
        return Ok(());
    }
    let session = session.context(MissingSessionClusterSnafu {
        cluster_id: &session_job.spec.cluster_id,
    })?;

    ctx.reconciler
        .reconcile_session_job(session_job, status, session)
        .await
        .context(ReconcileSnafu)
}

fn requeue_interval(status: &FlinkSessionJobStatus, config: &FlinkOperatorConfig) -> Duration {
    if status.job_status.is_running() && !status.job_status.savepoint_info.is_pending() {
        *config.reconcile_interval
    } else {
        *config.progress_check_interval
    }
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<FlinkSessionJob>>,
    error: &Error,
    ctx: Arc<Ctx>,
) -> Action {
    match error {
        // root object is invalid, will be requeued when modified anyway
        Error::InvalidFlinkSessionJob { .. } => Action::await_change(),

        Error::Observe {
            source: observer::Error::MultipleJobsFound { .. },
        } => Action::await_change(),

        _ => Action::requeue(*ctx.operator_config.progress_check_interval),
    }
}

/// Session jobs to reconcile when the session cluster `session` changes
pub fn session_jobs_of<'a>(
    session_jobs: impl IntoIterator<Item = &'a FlinkSessionJob>,
    session: &FlinkDeployment,
) -> Vec<&'a FlinkSessionJob> {
    session_jobs
        .into_iter()
        .filter(|session_job| {
            session_job.spec.cluster_id == session.name_any()
                && session_job.namespace() == session.namespace()
        })
        .collect()
}
