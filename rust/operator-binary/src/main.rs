mod config_builder;
mod flink_deployment_controller;
mod job_controller;
mod observer;
mod operator_config;
mod reconciler;
mod session_job_controller;
mod util;
mod validation;

use std::sync::Arc;

use clap::{crate_description, crate_version, Parser};
use futures::StreamExt;
use stackable_flink_crd::{
    session_job::FlinkSessionJob, FlinkDeployment, APP_NAME, OPERATOR_NAME,
};
use stackable_operator::{
    cli::Command,
    kube::{
        core::DeserializeGuard,
        runtime::{reflector::ObjectRef, watcher, Controller},
        ResourceExt,
    },
    logging::controller::report_controller_reconciled,
    CustomResourceExt,
};

use crate::{
    flink_deployment_controller::FLINK_DEPLOYMENT_FULL_CONTROLLER_NAME,
    job_controller::{
        kubernetes::KubernetesClusterDeployments, rest::RestClusterClientFactory, FlinkService,
    },
    observer::{DeploymentObserver, SessionJobObserver},
    operator_config::FlinkOperatorRun,
    reconciler::JobReconciler,
    session_job_controller::{session_jobs_of, SESSION_JOB_FULL_CONTROLLER_NAME},
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<FlinkOperatorRun>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    match opts.cmd {
        Command::Crd => {
            FlinkDeployment::print_yaml_schema(built_info::PKG_VERSION)?;
            FlinkSessionJob::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(FlinkOperatorRun { common, operator }) => {
            stackable_operator::logging::initialize_logging(
                "FLINK_OPERATOR_LOG",
                APP_NAME,
                common.tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let watch_namespace = common.watch_namespace;
            let default_config = operator.load_default_flink_config()?;

            let client =
                stackable_operator::client::create_client(Some(OPERATOR_NAME.to_string())).await?;

            let cluster_clients = RestClusterClientFactory::new(
                *operator.flink_client_timeout,
                *operator.flink_cancel_job_timeout,
            )?;
            let cluster_deployments = Arc::new(KubernetesClusterDeployments::new(client.clone()));
            let job_controller = Arc::new(FlinkService::new(
                Arc::new(cluster_clients),
                cluster_deployments.clone(),
            ));
            let validators = Arc::new(validation::discover_validators(&default_config));

            let flink_deployment_controller = Controller::new(
                watch_namespace.get_api::<DeserializeGuard<FlinkDeployment>>(&client),
                watcher::Config::default(),
            )
            .shutdown_on_signal()
            .run(
                flink_deployment_controller::reconcile_flink_deployment,
                flink_deployment_controller::error_policy,
                Arc::new(flink_deployment_controller::Ctx {
                    client: client.clone(),
                    validators: validators.clone(),
                    observer: DeploymentObserver::new(
                        job_controller.clone(),
                        cluster_deployments,
                        &operator,
                        default_config.clone(),
                    ),
                    reconciler: JobReconciler::new(job_controller.clone(), default_config.clone()),
                    operator_config: operator.clone(),
                }),
            )
            .map(|res| {
                report_controller_reconciled(&client, FLINK_DEPLOYMENT_FULL_CONTROLLER_NAME, &res);
            });

            let session_job_controller_builder = Controller::new(
                watch_namespace.get_api::<DeserializeGuard<FlinkSessionJob>>(&client),
                watcher::Config::default(),
            );
            let session_job_store = session_job_controller_builder.store();
            let session_job_controller = session_job_controller_builder
                .shutdown_on_signal()
                .watches(
                    watch_namespace.get_api::<DeserializeGuard<FlinkDeployment>>(&client),
                    watcher::Config::default(),
                    move |session| {
                        let session_jobs = session_job_store.state();
                        let Ok(session) = &session.0 else {
                            return Vec::new();
                        };
                        session_jobs_of(
                            session_jobs
                                .iter()
                                .filter_map(|session_job| session_job.0.as_ref().ok()),
                            session,
                        )
                        .into_iter()
                        .filter_map(|session_job| {
                            Some(
                                ObjectRef::<DeserializeGuard<FlinkSessionJob>>::new(
                                    &session_job.name_any(),
                                )
                                .within(&session_job.namespace()?),
                            )
                        })
                        .collect()
                    },
                )
                .run(
                    session_job_controller::reconcile_session_job,
                    session_job_controller::error_policy,
                    Arc::new(session_job_controller::Ctx {
                        client: client.clone(),
                        validators,
                        observer: SessionJobObserver::new(
                            job_controller.clone(),
                            &operator,
                            default_config.clone(),
                        ),
                        reconciler: JobReconciler::new(job_controller, default_config),
                        operator_config: operator.clone(),
                    }),
                )
                .map(|res| {
                    report_controller_reconciled(&client, SESSION_JOB_FULL_CONTROLLER_NAME, &res);
                });

            futures::stream::select(flink_deployment_controller, session_job_controller)
                .collect::<()>()
                .await;
        }
    }

    Ok(())
}
