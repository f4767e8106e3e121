use std::collections::BTreeMap;

use stackable_flink_crd::{
    flink_config::{FlinkConfig, CLUSTER_ID, NAMESPACE, SAVEPOINT_DIRECTORY},
    memory::MemorySize,
    session_job::FlinkSessionJob,
    status::{FlinkDeploymentStatus, JobManagerDeploymentStatus},
    FlinkDeployment, FlinkDeploymentSpec, IngressSpec, JobSpec, JobState, Resource, UpgradeMode,
    CONFIG_FILE_LOG4J_NAME, CONFIG_FILE_LOGBACK_NAME,
};
use stackable_operator::kube::ResourceExt;

use super::FlinkResourceValidator;
use crate::config_builder::{self, FlinkConfigBuilder};

/// Keys managed by the operator that must not be overridden through `flinkConfiguration`
const FORBIDDEN_CONF_KEYS: [&str; 2] = [NAMESPACE, CLUSTER_ID];
const ALLOWED_LOG_CONF_KEYS: [&str; 2] = [CONFIG_FILE_LOG4J_NAME, CONFIG_FILE_LOGBACK_NAME];

const INGRESS_NAME_PLACEHOLDER: &str = "{{name}}";
const INGRESS_NAMESPACE_PLACEHOLDER: &str = "{{namespace}}";

/// The validation rules every resource has to pass.
pub struct DefaultValidator {
    default_config: FlinkConfig,
}

impl DefaultValidator {
    pub fn new(default_config: FlinkConfig) -> Self {
        Self { default_config }
    }

    /// The configuration the reconciler would deploy `deployment` with
    fn effective_config(&self, deployment: &FlinkDeployment) -> FlinkConfig {
        config_builder::effective_config(deployment, &self.default_config)
    }
}

impl FlinkResourceValidator for DefaultValidator {
    fn validate_deployment(&self, deployment: &FlinkDeployment) -> Option<String> {
        let spec = &deployment.spec;
        let effective_config = self.effective_config(deployment);
        let status = deployment.status.clone().unwrap_or_default();
        let first_deployment = status.reconciliation_status.is_first_deployment();

        validate_flink_version(spec)
            .or_else(|| validate_flink_config(&spec.flink_configuration))
            .or_else(|| validate_ingress(spec.ingress.as_ref(), deployment))
            .or_else(|| validate_log_config(spec.log_configuration.as_ref()))
            .or_else(|| {
                spec.job
                    .as_ref()
                    .and_then(|job| validate_job_spec(job, &effective_config, first_deployment))
            })
            .or_else(|| validate_job_manager_spec(spec, &effective_config))
            .or_else(|| validate_task_manager_spec(spec))
            .or_else(|| self.validate_spec_change(deployment, &status))
    }

    fn validate_session_job(
        &self,
        session_job: &FlinkSessionJob,
        session: Option<&FlinkDeployment>,
    ) -> Option<String> {
        let Some(session) = session else {
            return Some(format!(
                "Could not find the session cluster {}",
                session_job.spec.cluster_id
            ));
        };
        let effective_config = self.effective_config(session);
        let first_deployment = session_job.status.as_ref().map_or(true, |status| {
            status.reconciliation_status.is_first_deployment()
        });

        validate_session_cluster_id(session_job, session)
            .or_else(|| validate_not_application_cluster(session))
            .or_else(|| {
                validate_job_spec(&session_job.spec.job, &effective_config, first_deployment)
            })
            .or_else(|| validate_session_job_upgrade_mode(&session_job.spec.job))
    }
}

fn validate_flink_version(spec: &FlinkDeploymentSpec) -> Option<String> {
    match spec.flink_version {
        Some(_) => None,
        None => Some("Flink Version must be defined.".to_string()),
    }
}

fn validate_flink_config(flink_configuration: &BTreeMap<String, String>) -> Option<String> {
    flink_configuration
        .keys()
        .find(|key| FORBIDDEN_CONF_KEYS.contains(&key.as_str()))
        .map(|key| format!("Forbidden Flink config key: {key}"))
}

fn validate_ingress(ingress: Option<&IngressSpec>, deployment: &FlinkDeployment) -> Option<String> {
    let ingress = ingress?;
    let Some(template) = ingress
        .template
        .as_deref()
        .filter(|template| !template.trim().is_empty())
    else {
        return Some("Ingress template must be defined".to_string());
    };

    let host = template
        .replace(INGRESS_NAME_PLACEHOLDER, &deployment.name_any())
        .replace(
            INGRESS_NAMESPACE_PLACEHOLDER,
            deployment.namespace().as_deref().unwrap_or_default(),
        );
    reqwest::Url::parse(&format!("http://{host}"))
        .err()
        .map(|error| format!("Unable to process the Ingress template({template}). Error: {error}"))
}

fn validate_log_config(log_configuration: Option<&BTreeMap<String, String>>) -> Option<String> {
    log_configuration?
        .keys()
        .find(|key| !ALLOWED_LOG_CONF_KEYS.contains(&key.as_str()))
        .map(|key| format!("Invalid log config key: {key}"))
}

fn validate_job_spec(job: &JobSpec, conf: &FlinkConfig, first_deployment: bool) -> Option<String> {
    if job
        .jar_uri
        .as_deref()
        .map_or(true, |jar_uri| jar_uri.trim().is_empty())
    {
        return Some("Jar URI must be defined".to_string());
    }

    if first_deployment && job.state != JobState::Running {
        return Some("Job must start in running state".to_string());
    }

    if job.parallelism.is_some_and(|parallelism| parallelism < 1) {
        return Some("Job parallelism must be larger than 0".to_string());
    }

    if job.upgrade_mode == UpgradeMode::LastState && !conf.is_high_availability_enabled() {
        return Some(
            "Job could not be upgraded with last-state while Kubernetes HA disabled".to_string(),
        );
    }

    if job.upgrade_mode == UpgradeMode::Savepoint && conf.savepoint_directory().is_none() {
        return Some(format!(
            "Job could not be upgraded with savepoint while config key[{SAVEPOINT_DIRECTORY}] is not set"
        ));
    }

    if job.manual_savepoint_requested() && conf.savepoint_directory().is_none() {
        return Some(format!(
            "Savepoint could not be manually triggered for the running job while config key[{SAVEPOINT_DIRECTORY}] is not set"
        ));
    }

    None
}

fn validate_job_manager_spec(spec: &FlinkDeploymentSpec, conf: &FlinkConfig) -> Option<String> {
    let job_manager = spec.job_manager.as_ref()?;

    if job_manager.replicas < 1 {
        return Some("JobManager replicas should not be configured less than one.".to_string());
    }
    if job_manager.replicas > 1 && !conf.is_high_availability_enabled() {
        return Some(
            "Kubernetes High availability should be enabled when starting standby JobManagers."
                .to_string(),
        );
    }

    validate_resources("JobManager", &job_manager.resource)
}

fn validate_task_manager_spec(spec: &FlinkDeploymentSpec) -> Option<String> {
    let task_manager = spec.task_manager.as_ref()?;
    validate_resources("TaskManager", &task_manager.resource)
}

fn validate_resources(component: &str, resource: &Resource) -> Option<String> {
    match resource.memory.as_deref() {
        None => Some(format!("{component} resource memory must be defined")),
        Some(memory) => MemorySize::parse(memory)
            .err()
            .map(|error| format!("{component} resource memory parse error: {error}")),
    }
}

impl DefaultValidator {
    /// Rules that only apply when a previously reconciled spec is replaced.
    fn validate_spec_change(
        &self,
        deployment: &FlinkDeployment,
        status: &FlinkDeploymentStatus,
    ) -> Option<String> {
        let new_spec = &deployment.spec;
        let old_spec = match status
            .reconciliation_status
            .deserialize_last_reconciled_spec::<FlinkDeploymentSpec>()
        {
            Ok(Some(old_spec)) => old_spec,
            Ok(None) => return None,
            Err(error) => {
                return Some(format!(
                    "Could not read the last reconciled spec. Error: {error}"
                ))
            }
        };

        let (old_job, new_job) = match (&old_spec.job, &new_spec.job) {
            (Some(_), None) => return Some("Cannot switch from job to session cluster".to_string()),
            (None, Some(_)) => return Some("Cannot switch from session to job cluster".to_string()),
            (None, None) => return None,
            (Some(old_job), Some(new_job)) => (old_job, new_job),
        };

        let old_config =
            FlinkConfigBuilder::build_from(&deployment.metadata, &old_spec, &self.default_config);
        if old_job.upgrade_mode != UpgradeMode::LastState
            && new_job.upgrade_mode == UpgradeMode::LastState
            && status.job_manager_deployment_status == JobManagerDeploymentStatus::Ready
            && !old_config.is_high_availability_enabled()
        {
            return Some(format!(
                "Job could not be upgraded to last-state while config key[{SAVEPOINT_DIRECTORY}] is not set"
            ));
        }

        if old_job.state == JobState::Suspended
            && new_job.state == JobState::Running
            && new_job.upgrade_mode == UpgradeMode::Savepoint
            && status
                .job_status
                .savepoint_info
                .last_savepoint_location()
                .is_none()
        {
            return Some("Cannot perform savepoint restore without a valid savepoint".to_string());
        }

        None
    }
}

fn validate_session_cluster_id(
    session_job: &FlinkSessionJob,
    session: &FlinkDeployment,
) -> Option<String> {
    if session.name_any() == session_job.spec.cluster_id {
        None
    } else {
        Some("The session job's cluster id is not match with the session cluster".to_string())
    }
}

fn validate_not_application_cluster(session: &FlinkDeployment) -> Option<String> {
    if session.is_session_cluster() {
        None
    } else {
        Some("Can not submit to application cluster".to_string())
    }
}

fn validate_session_job_upgrade_mode(job: &JobSpec) -> Option<String> {
    match job.upgrade_mode {
        UpgradeMode::LastState => {
            Some("The LAST_STATE upgrade mode is not supported in session job now.".to_string())
        }
        UpgradeMode::Stateless | UpgradeMode::Savepoint => None,
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use stackable_flink_crd::{
        flink_config::{HIGH_AVAILABILITY, HIGH_AVAILABILITY_STORAGE_DIR, PIPELINE_JARS},
        status::{Savepoint, SavepointTriggerType},
        FlinkVersion,
    };

    use super::*;

    fn application_cluster() -> FlinkDeployment {
        serde_yaml::from_str(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkDeployment
            metadata:
              name: test-cluster
              namespace: flink-operator-test
              uid: 2f1a4d0e-7c3b-4a8e-9b6d-5e0c1f2a3b4c
            spec:
              image: flink:1.15
              flinkVersion: v1_15
              flinkConfiguration:
                taskmanager.numberOfTaskSlots: '2'
                high-availability: org.apache.flink.kubernetes.highavailability.KubernetesHaServicesFactory
                high-availability.storageDir: file:///flink-data/ha
                state.savepoints.dir: file:///flink-data/savepoints
              jobManager:
                replicas: 1
                resource:
                  memory: 2048m
                  cpu: 1
              taskManager:
                resource:
                  memory: 2048m
                  cpu: 1
              job:
                jarURI: local:///opt/flink/examples/streaming/StateMachineExample.jar
                parallelism: 1
                upgradeMode: stateless
                state: running
        "})
        .unwrap()
    }

    fn session_cluster() -> FlinkDeployment {
        let mut session = application_cluster();
        session.metadata.name = Some("test-session-cluster".to_string());
        session.spec.job = None;
        session
    }

    fn session_job() -> FlinkSessionJob {
        serde_yaml::from_str(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkSessionJob
            metadata:
              name: test-session-job
              namespace: flink-operator-test
            spec:
              clusterId: test-session-cluster
              job:
                jarURI: https://repo1.maven.org/maven2/org/apache/flink/flink-examples-streaming_2.12/1.15.0/flink-examples-streaming_2.12-1.15.0-TopSpeedWindowing.jar
                parallelism: 1
                upgradeMode: stateless
        "})
        .unwrap()
    }

    fn job(deployment: &mut FlinkDeployment) -> &mut JobSpec {
        deployment.spec.job.as_mut().unwrap()
    }

    /// Records `last_spec` as the previously reconciled spec of `deployment`
    fn reconciled_from(deployment: &mut FlinkDeployment, last_spec: &FlinkDeploymentSpec) {
        deployment
            .status
            .get_or_insert_with(FlinkDeploymentStatus::default)
            .reconciliation_status
            .serialize_and_set_last_reconciled_spec(last_spec, 0)
            .unwrap();
    }

    fn validate(modify: impl FnOnce(&mut FlinkDeployment)) -> Option<String> {
        let mut deployment = application_cluster();
        modify(&mut deployment);
        DefaultValidator::new(FlinkConfig::new()).validate_deployment(&deployment)
    }

    fn assert_success(modify: impl FnOnce(&mut FlinkDeployment)) {
        assert_eq!(None, validate(modify));
    }

    fn assert_error(modify: impl FnOnce(&mut FlinkDeployment), expected: &str) {
        match validate(modify) {
            Some(error) => assert!(
                error.starts_with(expected),
                "expected [{expected}] but got [{error}]"
            ),
            None => panic!("Did not get expected error: {expected}"),
        }
    }

    fn assert_session_job_error(
        session_job: FlinkSessionJob,
        session: Option<FlinkDeployment>,
        expected: &str,
    ) {
        let error = DefaultValidator::new(FlinkConfig::new())
            .validate_session_job(&session_job, session.as_ref())
            .unwrap_or_else(|| panic!("Did not get expected error: {expected}"));
        assert!(
            error.starts_with(expected),
            "expected [{expected}] but got [{error}]"
        );
    }

    #[test]
    fn test_valid_application_cluster() {
        assert_success(|_| {});
        assert_success(|dep| dep.spec.flink_version = Some(FlinkVersion::V1_14));
    }

    #[test]
    fn test_job_validation() {
        assert_error(|dep| job(dep).jar_uri = None, "Jar URI must be defined");
        assert_error(
            |dep| job(dep).jar_uri = Some(" ".to_string()),
            "Jar URI must be defined",
        );
        assert_error(
            |dep| job(dep).state = JobState::Suspended,
            "Job must start in running state",
        );
    }

    #[test]
    fn test_suspend_after_first_deployment() {
        assert_success(|dep| {
            let last_spec = dep.spec.clone();
            reconciled_from(dep, &last_spec);
            job(dep).state = JobState::Suspended;
        });
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    fn test_invalid_parallelism(#[case] parallelism: i32) {
        assert_error(
            |dep| job(dep).parallelism = Some(parallelism),
            "Job parallelism must be larger than 0",
        );
    }

    #[test]
    fn test_upgrade_mode_requirements() {
        assert_error(
            |dep| {
                dep.spec.flink_configuration.clear();
                job(dep).upgrade_mode = UpgradeMode::LastState;
            },
            "Job could not be upgraded with last-state while Kubernetes HA disabled",
        );
        assert_error(
            |dep| {
                dep.spec.flink_configuration.clear();
                job(dep).upgrade_mode = UpgradeMode::Savepoint;
            },
            "Job could not be upgraded with savepoint while config key[state.savepoints.dir] is not set",
        );
        assert_error(
            |dep| {
                dep.spec.flink_configuration.clear();
                job(dep).savepoint_trigger_nonce = Some(7_384_221_093);
            },
            "Savepoint could not be manually triggered for the running job while config key[state.savepoints.dir] is not set",
        );
        assert_success(|dep| job(dep).upgrade_mode = UpgradeMode::LastState);
        assert_success(|dep| job(dep).upgrade_mode = UpgradeMode::Savepoint);
    }

    #[test]
    fn test_operator_defaults_count_as_configuration() {
        let mut defaults = FlinkConfig::new();
        defaults.set(SAVEPOINT_DIRECTORY, "s3://flink/savepoints");

        let mut deployment = application_cluster();
        deployment.spec.flink_configuration.clear();
        job(&mut deployment).upgrade_mode = UpgradeMode::Savepoint;

        assert_eq!(
            None,
            DefaultValidator::new(defaults).validate_deployment(&deployment)
        );
    }

    #[test]
    fn test_validates_the_deployed_configuration() {
        let deployment = application_cluster();
        let validator = DefaultValidator::new(FlinkConfig::new());

        let conf = validator.effective_config(&deployment);

        assert_eq!(
            config_builder::effective_config(&deployment, &FlinkConfig::new()),
            conf
        );
        assert_eq!(
            Some("local:///opt/flink/examples/streaming/StateMachineExample.jar"),
            conf.get(PIPELINE_JARS)
        );
        assert_eq!(Some("flink-operator-test"), conf.get(NAMESPACE));
    }

    #[test]
    fn test_flink_config_validation() {
        assert_success(|dep| {
            dep.spec.flink_configuration =
                BTreeMap::from([("random".to_string(), "config".to_string())])
        });
        assert_error(
            |dep| {
                dep.spec.flink_configuration =
                    BTreeMap::from([(NAMESPACE.to_string(), "myns".to_string())])
            },
            "Forbidden Flink config key: kubernetes.namespace",
        );
        assert_error(
            |dep| {
                dep.spec
                    .flink_configuration
                    .insert(CLUSTER_ID.to_string(), "other".to_string());
            },
            "Forbidden Flink config key",
        );
    }

    #[test]
    fn test_log_config_validation() {
        assert_success(|dep| {
            dep.spec.log_configuration = Some(BTreeMap::from([(
                CONFIG_FILE_LOG4J_NAME.to_string(),
                "rootLogger.level = INFO".to_string(),
            )]))
        });
        assert_error(
            |dep| {
                dep.spec.log_configuration = Some(BTreeMap::from([(
                    "random".to_string(),
                    "config".to_string(),
                )]))
            },
            "Invalid log config key",
        );
    }

    #[test]
    fn test_ingress_validation() {
        assert_error(
            |dep| dep.spec.ingress = Some(IngressSpec::default()),
            "Ingress template must be defined",
        );
        assert_error(
            |dep| {
                dep.spec.ingress = Some(IngressSpec {
                    template: Some("example.com:port".to_string()),
                    ..IngressSpec::default()
                })
            },
            "Unable to process the Ingress template(example.com:port). Error: ",
        );
        assert_success(|dep| {
            dep.spec.ingress = Some(IngressSpec {
                template: Some("example.com/{{namespace}}/{{name}}".to_string()),
                ..IngressSpec::default()
            })
        });
        assert_success(|dep| {
            dep.spec.ingress = Some(IngressSpec {
                template: Some("{{name}}.{{namespace}}.flink.k8s.io".to_string()),
                ..IngressSpec::default()
            })
        });
    }

    #[test]
    fn test_job_manager_replicas() {
        assert_error(
            |dep| {
                dep.spec.flink_configuration.clear();
                dep.spec.job_manager.as_mut().unwrap().replicas = 2;
            },
            "Kubernetes High availability should be enabled when starting standby JobManagers.",
        );
        assert_error(
            |dep| dep.spec.job_manager.as_mut().unwrap().replicas = 0,
            "JobManager replicas should not be configured less than one.",
        );
        assert_success(|dep| dep.spec.job_manager.as_mut().unwrap().replicas = 2);
    }

    #[rstest]
    #[case(Some("1G"), None)]
    #[case(Some("100"), None)]
    #[case(Some("invalid"), Some("TaskManager resource memory parse error"))]
    #[case(None, Some("TaskManager resource memory must be defined"))]
    fn test_task_manager_memory(#[case] memory: Option<&str>, #[case] expected: Option<&str>) {
        let modify = |dep: &mut FlinkDeployment| {
            dep.spec.task_manager.as_mut().unwrap().resource.memory = memory.map(String::from)
        };
        match expected {
            Some(expected) => assert_error(modify, expected),
            None => assert_success(modify),
        }
    }

    #[rstest]
    #[case(Some("invalid"), "JobManager resource memory parse error")]
    #[case(None, "JobManager resource memory must be defined")]
    fn test_job_manager_memory(#[case] memory: Option<&str>, #[case] expected: &str) {
        assert_error(
            |dep| dep.spec.job_manager.as_mut().unwrap().resource.memory = memory.map(String::from),
            expected,
        );
    }

    #[test]
    fn test_savepoint_restore_validation() {
        let resume_with_savepoint = |dep: &mut FlinkDeployment| {
            let mut last_spec = dep.spec.clone();
            job(dep).upgrade_mode = UpgradeMode::Savepoint;
            last_spec.job.as_mut().unwrap().state = JobState::Suspended;
            reconciled_from(dep, &last_spec);
        };

        assert_success(|dep| {
            resume_with_savepoint(dep);
            dep.status
                .as_mut()
                .unwrap()
                .job_status
                .savepoint_info
                .update_last_savepoint(Savepoint::new(
                    "sp",
                    0,
                    Some(SavepointTriggerType::Upgrade),
                ));
        });
        assert_error(
            resume_with_savepoint,
            "Cannot perform savepoint restore without a valid savepoint",
        );
    }

    #[test]
    fn test_cluster_type_validation() {
        assert_error(
            |dep| {
                let last_spec = dep.spec.clone();
                reconciled_from(dep, &last_spec);
                dep.spec.job = None;
            },
            "Cannot switch from job to session cluster",
        );
        assert_error(
            |dep| {
                let last_spec = FlinkDeploymentSpec {
                    job: None,
                    ..dep.spec.clone()
                };
                reconciled_from(dep, &last_spec);
            },
            "Cannot switch from session to job cluster",
        );
    }

    #[test]
    fn test_upgrade_mode_change_validation() {
        let switch_to_last_state = |dep: &mut FlinkDeployment, ready: JobManagerDeploymentStatus| {
            job(dep).upgrade_mode = UpgradeMode::LastState;
            let mut last_spec = dep.spec.clone();
            last_spec.job.as_mut().unwrap().upgrade_mode = UpgradeMode::Stateless;
            last_spec.flink_configuration.remove(HIGH_AVAILABILITY);
            last_spec
                .flink_configuration
                .remove(HIGH_AVAILABILITY_STORAGE_DIR);
            reconciled_from(dep, &last_spec);
            dep.status.as_mut().unwrap().job_manager_deployment_status = ready;
        };

        assert_error(
            |dep| switch_to_last_state(dep, JobManagerDeploymentStatus::Ready),
            "Job could not be upgraded to last-state while config key[state.savepoints.dir] is not set",
        );
        assert_success(|dep| switch_to_last_state(dep, JobManagerDeploymentStatus::Missing));
    }

    #[test]
    fn test_flink_version() {
        assert_error(
            |dep| dep.spec.flink_version = None,
            "Flink Version must be defined.",
        );
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut deployment = application_cluster();
        let spec = deployment.spec.clone();
        reconciled_from(&mut deployment, &spec);
        let validator = DefaultValidator::new(FlinkConfig::new());

        assert_eq!(None, validator.validate_deployment(&deployment));
        assert_eq!(None, validator.validate_deployment(&deployment));
    }

    #[test]
    fn test_session_job_with_session() {
        let validator = DefaultValidator::new(FlinkConfig::new());
        assert_eq!(
            None,
            validator.validate_session_job(&session_job(), Some(&session_cluster()))
        );

        let mut mismatched = session_job();
        mismatched.spec.cluster_id = "not-match".to_string();
        assert_session_job_error(
            mismatched,
            Some(session_cluster()),
            "The session job's cluster id is not match with the session cluster",
        );

        let mut application = session_cluster();
        application.spec.job = Some(JobSpec::default());
        assert_session_job_error(
            session_job(),
            Some(application),
            "Can not submit to application cluster",
        );
    }

    #[test]
    fn test_session_job_without_session() {
        assert_session_job_error(
            session_job(),
            None,
            "Could not find the session cluster test-session-cluster",
        );
    }

    #[test]
    fn test_session_job_spec_validation() {
        let mut missing_jar = session_job();
        missing_jar.spec.job.jar_uri = None;
        assert_session_job_error(missing_jar, Some(session_cluster()), "Jar URI must be defined");

        let mut last_state = session_job();
        last_state.spec.job.upgrade_mode = UpgradeMode::LastState;
        assert_session_job_error(
            last_state,
            Some(session_cluster()),
            "The LAST_STATE upgrade mode is not supported in session job now.",
        );

        let mut savepoint = session_job();
        savepoint.spec.job.upgrade_mode = UpgradeMode::Savepoint;
        let mut session = session_cluster();
        session.spec.flink_configuration.remove(SAVEPOINT_DIRECTORY);
        assert_session_job_error(
            savepoint,
            Some(session),
            "Job could not be upgraded with savepoint while config key[state.savepoints.dir] is not set",
        );
    }
}
