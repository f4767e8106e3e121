use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::schemars::{self, JsonSchema};
use strum::Display;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to serialize the reconciled spec"))]
    SerializeSpec { source: serde_json::Error },

    #[snafu(display("failed to deserialize the last reconciled spec"))]
    DeserializeSpec { source: serde_json::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlinkDeploymentStatus {
    #[serde(default)]
    pub job_status: JobStatus,
    #[serde(default)]
    pub job_manager_deployment_status: JobManagerDeploymentStatus,
    #[serde(default)]
    pub reconciliation_status: ReconciliationStatus,
    /// Last validation or reconciliation error, cleared by the next successful reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobManagerDeploymentStatus {
    /// JobManager is running and its REST endpoint answers.
    Ready,
    /// JobManager Deployment is available, the REST endpoint has not been reached yet.
    DeployedNotReady,
    /// JobManager Deployment exists but is not available yet.
    Deploying,
    #[default]
    Missing,
    Error,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Hex id of the tracked Flink job, fixed once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Last observed Flink job state, e.g. `RUNNING` or `SUSPENDED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    #[serde(default)]
    pub savepoint_info: SavepointInfo,
}

impl JobStatus {
    /// Starts tracking the given job. Returns `false` and keeps the current id if another job is
    /// already tracked.
    pub fn track_job(&mut self, job_id: impl Into<String>) -> bool {
        let job_id = job_id.into();
        match &self.job_id {
            Some(tracked) => tracked.eq_ignore_ascii_case(&job_id),
            None => {
                self.job_id = Some(job_id);
                true
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some(FLINK_JOB_STATE_RUNNING)
    }
}

pub const FLINK_JOB_STATE_RUNNING: &str = "RUNNING";
pub const FLINK_JOB_STATE_SUSPENDED: &str = "SUSPENDED";

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavepointInfo {
    /// Id of the pending savepoint trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// Epoch milliseconds of the pending trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<SavepointTriggerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_savepoint: Option<Savepoint>,
}

impl SavepointInfo {
    pub fn set_trigger(
        &mut self,
        trigger_id: impl Into<String>,
        trigger_type: SavepointTriggerType,
        now_millis: i64,
    ) {
        self.trigger_id = Some(trigger_id.into());
        self.trigger_timestamp = Some(now_millis);
        self.trigger_type = Some(trigger_type);
    }

    pub fn reset_trigger(&mut self) {
        self.trigger_id = None;
        self.trigger_timestamp = None;
        self.trigger_type = None;
    }

    /// Records a completed savepoint and resolves the pending trigger.
    pub fn update_last_savepoint(&mut self, savepoint: Savepoint) {
        self.last_savepoint = Some(savepoint);
        self.reset_trigger();
    }

    pub fn is_pending(&self) -> bool {
        self.trigger_id
            .as_deref()
            .is_some_and(|trigger_id| !trigger_id.trim().is_empty())
    }

    /// Location of the last savepoint, if one with a non-blank location was recorded
    pub fn last_savepoint_location(&self) -> Option<&str> {
        self.last_savepoint
            .as_ref()
            .map(|savepoint| savepoint.location.as_str())
            .filter(|location| !location.trim().is_empty())
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SavepointTriggerType {
    /// Requested through `savepointTriggerNonce`
    Manual,
    /// Requested by the periodic savepoint interval
    Periodic,
    /// Taken while stopping the job for an upgrade or suspension
    Upgrade,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Savepoint {
    /// Epoch milliseconds
    pub time_stamp: i64,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<SavepointTriggerType>,
}

impl Savepoint {
    pub fn new(
        location: impl Into<String>,
        time_stamp: i64,
        trigger_type: Option<SavepointTriggerType>,
    ) -> Self {
        Self {
            time_stamp,
            location: location.into(),
            trigger_type,
        }
    }
}

/// Bookkeeping of the specs that were applied, used to tell spec transitions from first
/// deployments.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    /// Epoch milliseconds of the last applied spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation_timestamp: Option<i64>,
    /// JSON serialized spec of the last applied change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_spec: Option<String>,
    /// JSON serialized spec that was last observed running successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stable_spec: Option<String>,
}

impl ReconciliationStatus {
    pub fn is_first_deployment(&self) -> bool {
        self.last_reconciled_spec.is_none()
    }

    pub fn serialize_and_set_last_reconciled_spec<S: Serialize>(
        &mut self,
        spec: &S,
        now_millis: i64,
    ) -> Result<()> {
        self.last_reconciled_spec = Some(serde_json::to_string(spec).context(SerializeSpecSnafu)?);
        self.reconciliation_timestamp = Some(now_millis);
        Ok(())
    }

    pub fn deserialize_last_reconciled_spec<S: DeserializeOwned>(&self) -> Result<Option<S>> {
        deserialize_spec(self.last_reconciled_spec.as_deref())
    }

    pub fn deserialize_last_stable_spec<S: DeserializeOwned>(&self) -> Result<Option<S>> {
        deserialize_spec(self.last_stable_spec.as_deref())
    }

    pub fn mark_reconciled_spec_as_stable(&mut self) {
        self.last_stable_spec = self.last_reconciled_spec.clone();
    }

    pub fn is_last_reconciled_spec_stable(&self) -> bool {
        self.last_reconciled_spec.is_some() && self.last_reconciled_spec == self.last_stable_spec
    }
}

fn deserialize_spec<S: DeserializeOwned>(serialized: Option<&str>) -> Result<Option<S>> {
    serialized
        .map(|spec| serde_json::from_str(spec).context(DeserializeSpecSnafu))
        .transpose()
}
