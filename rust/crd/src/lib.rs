pub mod flink_config;
pub mod memory;
pub mod session_job;
pub mod status;

use serde::{Deserialize, Serialize};
use stackable_operator::{
    k8s_openapi::api::core::v1::PodTemplateSpec,
    kube::CustomResource,
    schemars::{self, JsonSchema},
};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString};

use crate::status::FlinkDeploymentStatus;

pub const APP_NAME: &str = "flink";
pub const OPERATOR_NAME: &str = "flink.stackable.tech";

/// Log configuration files the operator knows how to mount into the Flink containers.
pub const CONFIG_FILE_LOG4J_NAME: &str = "log4j-console.properties";
pub const CONFIG_FILE_LOGBACK_NAME: &str = "logback-console.xml";

pub const DEFAULT_JOB_MANAGER_REPLICAS: i32 = 1;

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "flink.stackable.tech",
    version = "v1alpha1",
    kind = "FlinkDeployment",
    plural = "flinkdeployments",
    shortname = "flinkdep",
    status = "FlinkDeploymentStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct FlinkDeploymentSpec {
    /// The Flink image to run the JobManager and TaskManagers with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flink_version: Option<FlinkVersion>,
    /// Exposes the Flink web UI. The template may contain the `{{name}}` and `{{namespace}}`
    /// placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
    /// Flink configuration overrides. Keys that are managed by the operator are rejected.
    #[serde(default)]
    pub flink_configuration: BTreeMap<String, String>,
    /// Log configuration file contents, keyed by file name.
    /// Only `log4j-console.properties` and `logback-console.xml` are supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<BTreeMap<String, String>>,
    /// Pod template shared by JobManager and TaskManager pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_manager: Option<JobManagerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_manager: Option<TaskManagerSpec>,
    /// The job to run in application mode. Without a job the deployment is a session cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobSpec>,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumIter, Eq, JsonSchema, PartialEq, Serialize,
)]
pub enum FlinkVersion {
    #[serde(rename = "v1_13")]
    #[strum(serialize = "v1_13")]
    V1_13,
    #[serde(rename = "v1_14")]
    #[strum(serialize = "v1_14")]
    V1_14,
    #[serde(rename = "v1_15")]
    #[strum(serialize = "v1_15")]
    V1_15,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Number of CPU cores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    /// Total process memory in Flink notation, e.g. `2048m` or `2g`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManagerSpec {
    #[serde(default)]
    pub resource: Resource,
    /// Values larger than one start standby JobManagers and require high availability.
    #[serde(default = "default_job_manager_replicas")]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
}

impl Default for JobManagerSpec {
    fn default() -> Self {
        Self {
            resource: Resource::default(),
            replicas: DEFAULT_JOB_MANAGER_REPLICAS,
            pod_template: None,
        }
    }
}

fn default_job_manager_replicas() -> i32 {
    DEFAULT_JOB_MANAGER_REPLICAS
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskManagerSpec {
    #[serde(default)]
    pub resource: Resource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// URI of the job jar within the Flink image
    #[serde(default, rename = "jarURI", skip_serializing_if = "Option::is_none")]
    pub jar_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_class: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Desired state of the job. A job is always created `running`.
    #[serde(default)]
    pub state: JobState,
    /// Changing this to a new non-zero value triggers a savepoint of the running job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savepoint_trigger_nonce: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_savepoint_path: Option<String>,
    #[serde(default)]
    pub upgrade_mode: UpgradeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_non_restored_state: Option<bool>,
}

impl JobSpec {
    /// Compares two job specs while ignoring the savepoint trigger nonce, which only triggers a
    /// savepoint but never requires an upgrade.
    pub fn eq_ignoring_savepoint_trigger(&self, other: &JobSpec) -> bool {
        JobSpec {
            savepoint_trigger_nonce: None,
            ..self.clone()
        } == JobSpec {
            savepoint_trigger_nonce: None,
            ..other.clone()
        }
    }

    pub fn manual_savepoint_requested(&self) -> bool {
        matches!(self.savepoint_trigger_nonce, Some(nonce) if nonce != 0)
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, JsonSchema, PartialEq,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    #[default]
    Running,
    Suspended,
}

/// Strategy used to stop a running job when its spec changes.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UpgradeMode {
    /// The job is cancelled and its state discarded.
    #[default]
    Stateless,
    /// The job is stopped with a savepoint, which it is restored from afterwards.
    /// Requires `state.savepoints.dir` to be configured.
    Savepoint,
    /// The cluster is removed without touching the job, the job is restored from the latest
    /// checkpoint tracked by the high availability services. Requires high availability.
    LastState,
}

impl UpgradeMode {
    /// Whether the job state survives an upgrade in this mode
    pub fn preserves_state(&self) -> bool {
        match self {
            UpgradeMode::Stateless => false,
            UpgradeMode::Savepoint | UpgradeMode::LastState => true,
        }
    }
}

impl FlinkDeployment {
    pub fn is_session_cluster(&self) -> bool {
        self.spec.job.is_none()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_application_cluster() {
        let deployment: FlinkDeployment = serde_yaml::from_str(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkDeployment
            metadata:
              name: basic-example
            spec:
              image: flink:1.15
              flinkVersion: v1_15
              flinkConfiguration:
                taskmanager.numberOfTaskSlots: '2'
              jobManager:
                resource:
                  memory: 2048m
                  cpu: 1
              taskManager:
                resource:
                  memory: 2048m
                  cpu: 1
              job:
                jarURI: local:///opt/flink/examples/streaming/StateMachineExample.jar
                parallelism: 2
                upgradeMode: last-state
        "})
        .unwrap();

        assert!(!deployment.is_session_cluster());
        assert_eq!(Some(FlinkVersion::V1_15), deployment.spec.flink_version);
        let job_manager = deployment.spec.job_manager.unwrap();
        assert_eq!(DEFAULT_JOB_MANAGER_REPLICAS, job_manager.replicas);
        assert_eq!(Some("2048m".to_string()), job_manager.resource.memory);
        let job = deployment.spec.job.unwrap();
        assert_eq!(JobState::Running, job.state);
        assert_eq!(UpgradeMode::LastState, job.upgrade_mode);
        assert_eq!(Some(2), job.parallelism);
        assert_eq!(
            Some("local:///opt/flink/examples/streaming/StateMachineExample.jar".to_string()),
            job.jar_uri
        );
    }

    #[test]
    fn test_session_cluster() {
        let deployment: FlinkDeployment = serde_yaml::from_str(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkDeployment
            metadata:
              name: session
            spec:
              flinkVersion: v1_14
        "})
        .unwrap();

        assert!(deployment.is_session_cluster());
        assert!(deployment.spec.flink_configuration.is_empty());
        assert!(deployment.status.is_none());
    }

    #[rstest]
    #[case("stateless", UpgradeMode::Stateless)]
    #[case("savepoint", UpgradeMode::Savepoint)]
    #[case("last-state", UpgradeMode::LastState)]
    fn test_upgrade_mode_names(#[case] name: &str, #[case] mode: UpgradeMode) {
        assert_eq!(mode, serde_yaml::from_str::<UpgradeMode>(name).unwrap());
        assert_eq!(name, mode.to_string());
    }

    #[test]
    fn test_job_spec_comparison_ignores_nonce() {
        let job = JobSpec {
            jar_uri: Some("local:///job.jar".to_string()),
            ..JobSpec::default()
        };
        let triggered = JobSpec {
            savepoint_trigger_nonce: Some(42),
            ..job.clone()
        };
        let upgraded = JobSpec {
            parallelism: Some(4),
            ..job.clone()
        };

        assert!(job.eq_ignoring_savepoint_trigger(&triggered));
        assert!(!job.eq_ignoring_savepoint_trigger(&upgraded));
        assert!(triggered.manual_savepoint_requested());
        assert!(!job.manual_savepoint_requested());
    }
}
