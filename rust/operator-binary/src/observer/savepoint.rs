use std::{sync::Arc, time::Duration};

use snafu::ResultExt;
use stackable_flink_crd::{
    flink_config::FlinkConfig,
    status::{Savepoint, SavepointInfo},
};

use super::{FetchSavepointInfoSnafu, Result};
use crate::{
    job_controller::{JobController, SavepointFetchResult},
    util::now_millis,
};

/// Follows a pending savepoint trigger until it completes, fails or times out.
pub struct SavepointObserver {
    job_controller: Arc<dyn JobController>,
    grace_period: Duration,
}

impl SavepointObserver {
    pub fn new(job_controller: Arc<dyn JobController>, grace_period: Duration) -> Self {
        Self {
            job_controller,
            grace_period,
        }
    }

    /// Resolves the pending trigger in `savepoint_info`, if any. Failed and timed out savepoints
    /// clear the trigger and are returned as an error message for the resource status.
    pub async fn observe(
        &self,
        savepoint_info: &mut SavepointInfo,
        job_id: &str,
        conf: &FlinkConfig,
    ) -> Result<Option<String>> {
        let Some(trigger_id) = savepoint_info
            .trigger_id
            .clone()
            .filter(|_| savepoint_info.is_pending())
        else {
            return Ok(None);
        };

        let fetched = self
            .job_controller
            .fetch_savepoint_info(&trigger_id, job_id, conf)
            .await;
        let result = match fetched {
            Ok(result) => result,
            // An unreachable cluster must not keep the trigger pending forever
            Err(error) if self.grace_period_ended(savepoint_info) => {
                tracing::warn!(
                    job.id = job_id,
                    trigger.id = %trigger_id,
                    error = &error as &dyn std::error::Error,
                    "Failed to fetch the savepoint status"
                );
                SavepointFetchResult::Pending
            }
            Err(source) => {
                return Err(source).context(FetchSavepointInfoSnafu {
                    trigger_id: &trigger_id,
                })
            }
        };

        match result {
            SavepointFetchResult::Completed { location } => {
                tracing::info!(
                    job.id = job_id,
                    trigger.id = %trigger_id,
                    savepoint = %location,
                    "Savepoint completed"
                );
                let savepoint = Savepoint::new(location, now_millis(), savepoint_info.trigger_type);
                savepoint_info.update_last_savepoint(savepoint);
                Ok(None)
            }
            SavepointFetchResult::Failed { cause } => {
                tracing::warn!(job.id = job_id, trigger.id = %trigger_id, %cause, "Savepoint failed");
                savepoint_info.reset_trigger();
                Ok(Some(format!("Savepoint failed: {cause}")))
            }
            SavepointFetchResult::Pending if self.grace_period_ended(savepoint_info) => {
                tracing::warn!(job.id = job_id, trigger.id = %trigger_id, "Savepoint timed out");
                savepoint_info.reset_trigger();
                Ok(Some(format!(
                    "Savepoint timed out after {}s",
                    self.grace_period.as_secs()
                )))
            }
            SavepointFetchResult::Pending => {
                tracing::debug!(job.id = job_id, trigger.id = %trigger_id, "Savepoint in progress");
                Ok(None)
            }
        }
    }

    /// A trigger without a timestamp cannot be aged and counts as expired.
    fn grace_period_ended(&self, savepoint_info: &SavepointInfo) -> bool {
        let grace_period_millis = i64::try_from(self.grace_period.as_millis()).unwrap_or(i64::MAX);
        savepoint_info
            .trigger_timestamp
            .map_or(true, |triggered| {
                now_millis().saturating_sub(triggered) > grace_period_millis
            })
    }
}
