//! Keeps the status of each [`FlinkDeployment`] in sync with its Flink cluster and drives job
//! transitions.
use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use snafu::{ResultExt, Snafu};
use stackable_flink_crd::{
    status::{FlinkDeploymentStatus, JobManagerDeploymentStatus},
    FlinkDeployment, OPERATOR_NAME,
};
use stackable_operator::{
    kube::{
        core::{error_boundary, DeserializeGuard},
        runtime::controller::Action,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    observer::{self, DeploymentObserver},
    operator_config::FlinkOperatorConfig,
    reconciler::{self, JobReconciler},
    validation::Validators,
};

pub const FLINK_DEPLOYMENT_CONTROLLER_NAME: &str = "flinkdeployment";
pub const FLINK_DEPLOYMENT_FULL_CONTROLLER_NAME: &str =
    concatcp!(FLINK_DEPLOYMENT_CONTROLLER_NAME, '.', OPERATOR_NAME);

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub validators: Arc<Validators>,
    pub observer: DeploymentObserver,
    pub reconciler: JobReconciler,
    pub operator_config: FlinkOperatorConfig,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("FlinkDeployment object is invalid"))]
    InvalidFlinkDeployment {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("failed to observe the Flink cluster"))]
    Observe { source: observer::Error },

    #[snafu(display("failed to reconcile the Flink job"))]
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

pub async fn reconcile_flink_deployment(
    flink: Arc<DeserializeGuard<FlinkDeployment>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let flink = flink
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidFlinkDeploymentSnafu)?;
    let mut status = flink.status.clone().unwrap_or_default();
    status.error = None;

    let result = observe_and_reconcile(flink, &mut status, &ctx).await;
    if let Err(error) = &result {
        status.error = Some(error.to_string());
    }

    ctx.client
        .apply_patch_status(FLINK_DEPLOYMENT_FULL_CONTROLLER_NAME, flink, &status)
        .await
        .context(ApplyStatusSnafu)?;

    result?;
    Ok(Action::requeue(requeue_interval(
        &status,
        &ctx.operator_config,
    )))
}

/// Observation follows the last reconciled spec, so it also runs for specs that fail validation.
async fn observe_and_reconcile(
    flink: &FlinkDeployment,
    status: &mut FlinkDeploymentStatus,
    ctx: &Ctx,
) -> Result<()> {
    ctx.observer
        .observe(flink, status)
        .await
        .context(ObserveSnafu)?;

    if let Some(validation_error) = ctx.validators.validate_deployment(flink) {
        tracing::warn!(error = %validation_error, "Validation failed");
        status.error = Some(validation_error);
        return Ok(());
    }

    ctx.reconciler
        .reconcile_deployment(flink, status)
        .await
        .context(ReconcileSnafu)
}

fn requeue_interval(status: &FlinkDeploymentStatus, config: &FlinkOperatorConfig) -> Duration {
    let in_progress = status.job_manager_deployment_status != JobManagerDeploymentStatus::Ready
        || status.job_status.savepoint_info.is_pending();
    if in_progress {
        *config.progress_check_interval
    } else {
        *config.reconcile_interval
    }
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<FlinkDeployment>>,
    error: &Error,
    ctx: Arc<Ctx>,
) -> Action {
    match error {
        // root object is invalid, will be requeued when modified anyway
        Error::InvalidFlinkDeployment { .. } => Action::await_change(),

        // the tracked job id is ambiguous, retrying cannot resolve this
        Error::Observe {
            source: observer::Error::MultipleJobsFound { .. },
        } => Action::await_change(),

        _ => Action::requeue(*ctx.operator_config.progress_check_interval),
    }
}
