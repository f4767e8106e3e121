use std::{sync::Arc, time::Duration};

use snafu::ResultExt;
use stackable_flink_crd::{flink_config::FlinkConfig, status::JobStatus};

use super::{ListJobsSnafu, MultipleJobsFoundSnafu, Result};
use crate::{
    job_controller::{JobController, JobStatusMessage},
    util::now_millis,
};

/// Reaction to a Flink cluster that did not answer within the client timeout.
///
/// The context is whatever the caller wants the handler to act on, e.g. the JobManager deployment
/// status of an application cluster.
pub trait TimeoutHandler<C>: Send + Sync {
    fn on_timeout(&self, context: &mut C);
}

impl<C, F> TimeoutHandler<C> for F
where
    F: Fn(&mut C) + Send + Sync,
{
    fn on_timeout(&self, context: &mut C) {
        self(context)
    }
}

/// Keeps the [`JobStatus`] of the tracked job in sync with the Flink cluster.
pub struct JobStatusObserver<C> {
    job_controller: Arc<dyn JobController>,
    client_timeout: Duration,
    timeout_handler: Box<dyn TimeoutHandler<C>>,
}

impl<C> JobStatusObserver<C> {
    pub fn new(
        job_controller: Arc<dyn JobController>,
        client_timeout: Duration,
        timeout_handler: impl TimeoutHandler<C> + 'static,
    ) -> Self {
        Self {
            job_controller,
            client_timeout,
            timeout_handler: Box::new(timeout_handler),
        }
    }

    /// Updates `job_status` from the job list of the cluster. Returns whether the tracked job was
    /// found, the status is left untouched otherwise.
    pub async fn observe(
        &self,
        job_status: &mut JobStatus,
        conf: &FlinkConfig,
        context: &mut C,
    ) -> Result<bool> {
        let Some(job_id) = job_status.job_id.clone() else {
            tracing::debug!("No job to observe");
            return Ok(false);
        };

        let jobs =
            match tokio::time::timeout(self.client_timeout, self.job_controller.list_jobs(conf))
                .await
            {
                Ok(jobs) => jobs.context(ListJobsSnafu)?,
                Err(_) => {
                    tracing::warn!(
                        job.id = %job_id,
                        timeout = ?self.client_timeout,
                        "Flink cluster did not answer in time"
                    );
                    self.timeout_handler.on_timeout(context);
                    return Ok(false);
                }
            };

        update_job_status(job_status, &job_id, &jobs)
    }
}

fn update_job_status(
    job_status: &mut JobStatus,
    job_id: &str,
    jobs: &[JobStatusMessage],
) -> Result<bool> {
    let mut matches = jobs
        .iter()
        .filter(|job| job.job_id.eq_ignore_ascii_case(job_id));
    let Some(job) = matches.next() else {
        tracing::info!(job.id = job_id, "No job found");
        return Ok(false);
    };
    let others = matches.count();
    if others > 0 {
        return MultipleJobsFoundSnafu {
            job_id,
            count: others + 1,
        }
        .fail();
    }

    if job_status.state.as_deref() != Some(job.job_state.as_str()) {
        tracing::info!(
            job.id = job_id,
            from = job_status.state.as_deref().unwrap_or("UNKNOWN"),
            to = %job.job_state,
            "Job status changed"
        );
    }
    job_status.state = Some(job.job_state.clone());
    job_status.job_name = Some(job.job_name.clone());
    job_status.start_time = Some(job.start_time.to_string());
    job_status.update_time = Some(now_millis().to_string());
    Ok(true)
}
