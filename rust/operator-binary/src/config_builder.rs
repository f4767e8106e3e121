//! Assembles the effective Flink configuration of a [`FlinkDeployment`] from the operator
//! defaults and the resource spec.
use stackable_flink_crd::{
    flink_config::{
        FlinkConfig, CHECKPOINTING_INTERVAL, CLUSTER_ID, CONTAINER_IMAGE,
        CONTAINER_IMAGE_PULL_POLICY, DEFAULT_PARALLELISM, DEPLOYMENT_TARGET, JOB_MANAGER_CPU,
        JOB_MANAGER_MEMORY, JOB_MANAGER_REPLICAS, NAMESPACE, PIPELINE_FIXED_JOB_ID, PIPELINE_JARS,
        REST_SERVICE_EXPOSED_TYPE, SERVICE_ACCOUNT, TASK_MANAGER_CPU, TASK_MANAGER_MEMORY,
        WEB_CANCEL_ENABLE,
    },
    FlinkDeployment, FlinkDeploymentSpec, Resource, UpgradeMode,
};
use stackable_operator::kube::api::ObjectMeta;

pub const DEFAULT_CHECKPOINTING_INTERVAL: &str = "5 min";
const SERVICE_EXPOSED_TYPE_CLUSTER_IP: &str = "ClusterIP";
const DEPLOYMENT_TARGET_APPLICATION: &str = "kubernetes-application";
const DEPLOYMENT_TARGET_SESSION: &str = "kubernetes-session";

pub struct FlinkConfigBuilder<'a> {
    meta: &'a ObjectMeta,
    spec: &'a FlinkDeploymentSpec,
    effective_config: FlinkConfig,
}

impl<'a> FlinkConfigBuilder<'a> {
    pub fn new(meta: &'a ObjectMeta, spec: &'a FlinkDeploymentSpec, defaults: &FlinkConfig) -> Self {
        Self {
            meta,
            spec,
            effective_config: defaults.clone(),
        }
    }

    pub fn apply_flink_configuration(mut self) -> Self {
        for (key, value) in &self.spec.flink_configuration {
            self.effective_config.set(key.as_str(), value.as_str());
        }
        self.effective_config
            .set_default(REST_SERVICE_EXPOSED_TYPE, SERVICE_EXPOSED_TYPE_CLUSTER_IP);

        if let Some(job) = &self.spec.job {
            // Application clusters must only be stopped through the operator
            self.effective_config.set_default(WEB_CANCEL_ENABLE, "false");
            if job.upgrade_mode == UpgradeMode::LastState {
                self.effective_config
                    .set_default(CHECKPOINTING_INTERVAL, DEFAULT_CHECKPOINTING_INTERVAL);
            }
        }
        self
    }

    pub fn apply_image(mut self) -> Self {
        if let Some(image) = non_blank(self.spec.image.as_deref()) {
            self.effective_config.set(CONTAINER_IMAGE, image);
        }
        self
    }

    pub fn apply_image_pull_policy(mut self) -> Self {
        if let Some(policy) = non_blank(self.spec.image_pull_policy.as_deref()) {
            self.effective_config.set(CONTAINER_IMAGE_PULL_POLICY, policy);
        }
        self
    }

    pub fn apply_service_account(mut self) -> Self {
        if let Some(service_account) = &self.spec.service_account {
            self.effective_config
                .set(SERVICE_ACCOUNT, service_account.as_str());
        }
        self
    }

    /// The web UI is exposed through the ingress, so the REST service stays cluster internal.
    pub fn apply_ingress_domain(mut self) -> Self {
        if self.spec.ingress.is_some() {
            self.effective_config
                .set(REST_SERVICE_EXPOSED_TYPE, SERVICE_EXPOSED_TYPE_CLUSTER_IP);
        }
        self
    }

    pub fn apply_job_manager_spec(mut self) -> Self {
        if let Some(job_manager) = &self.spec.job_manager {
            set_resource(
                &mut self.effective_config,
                &job_manager.resource,
                JOB_MANAGER_MEMORY,
                JOB_MANAGER_CPU,
            );
            if job_manager.replicas > 0 {
                self.effective_config
                    .set(JOB_MANAGER_REPLICAS, job_manager.replicas.to_string());
            }
        }
        self
    }

    pub fn apply_task_manager_spec(mut self) -> Self {
        if let Some(task_manager) = &self.spec.task_manager {
            set_resource(
                &mut self.effective_config,
                &task_manager.resource,
                TASK_MANAGER_MEMORY,
                TASK_MANAGER_CPU,
            );
        }
        self
    }

    pub fn apply_job_or_session_spec(mut self) -> Self {
        match &self.spec.job {
            Some(job) => {
                self.effective_config
                    .set(DEPLOYMENT_TARGET, DEPLOYMENT_TARGET_APPLICATION);
                if let Some(jar_uri) = non_blank(job.jar_uri.as_deref()) {
                    self.effective_config.set(PIPELINE_JARS, jar_uri);
                }
                if let Some(parallelism) = job.parallelism.filter(|parallelism| *parallelism > 0) {
                    self.effective_config
                        .set(DEFAULT_PARALLELISM, parallelism.to_string());
                }
                if let Some(job_id) = application_job_id(self.meta) {
                    self.effective_config.set(PIPELINE_FIXED_JOB_ID, job_id);
                }
            }
            None => {
                self.effective_config
                    .set(DEPLOYMENT_TARGET, DEPLOYMENT_TARGET_SESSION);
            }
        }
        self
    }

    pub fn build(mut self) -> FlinkConfig {
        if let Some(namespace) = &self.meta.namespace {
            self.effective_config.set(NAMESPACE, namespace.as_str());
        }
        if let Some(name) = &self.meta.name {
            self.effective_config.set(CLUSTER_ID, name.as_str());
        }
        self.effective_config
    }

    /// Runs all steps in order.
    pub fn build_from(
        meta: &ObjectMeta,
        spec: &FlinkDeploymentSpec,
        defaults: &FlinkConfig,
    ) -> FlinkConfig {
        FlinkConfigBuilder::new(meta, spec, defaults)
            .apply_flink_configuration()
            .apply_image()
            .apply_image_pull_policy()
            .apply_service_account()
            .apply_ingress_domain()
            .apply_job_manager_spec()
            .apply_task_manager_spec()
            .apply_job_or_session_spec()
            .build()
    }
}

/// Effective configuration of the current spec of `deployment`
pub fn effective_config(deployment: &FlinkDeployment, defaults: &FlinkConfig) -> FlinkConfig {
    FlinkConfigBuilder::build_from(&deployment.metadata, &deployment.spec, defaults)
}

/// Flink job id of an application cluster, derived from the resource UID so that it survives
/// JobManager restarts. A UUID without its dashes is exactly the 32 hex digits of a job id.
pub fn application_job_id(meta: &ObjectMeta) -> Option<String> {
    meta.uid
        .as_deref()
        .map(|uid| uid.replace('-', "").to_lowercase())
        .filter(|job_id| job_id.len() == 32)
}

fn set_resource(config: &mut FlinkConfig, resource: &Resource, memory_key: &str, cpu_key: &str) {
    if let Some(memory) = &resource.memory {
        config.set(memory_key, memory.as_str());
    }
    if let Some(cpu) = resource.cpu {
        config.set(cpu_key, cpu.to_string());
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use stackable_flink_crd::flink_config::{HIGH_AVAILABILITY, SAVEPOINT_DIRECTORY};

    use super::*;

    fn deployment(yaml: &str) -> FlinkDeployment {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn application_cluster() -> FlinkDeployment {
        deployment(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkDeployment
            metadata:
              name: basic-example
              namespace: flink
              uid: 8a3e43c4-5d5f-4f7c-9c61-7e5a0a1f6d2b
            spec:
              image: flink:1.15
              imagePullPolicy: IfNotPresent
              serviceAccount: flink
              flinkVersion: v1_15
              flinkConfiguration:
                taskmanager.numberOfTaskSlots: '2'
              jobManager:
                replicas: 1
                resource:
                  memory: 2048m
                  cpu: 1
              taskManager:
                resource:
                  memory: 2048m
                  cpu: 0.5
              job:
                jarURI: local:///opt/flink/examples/streaming/StateMachineExample.jar
                parallelism: 2
                upgradeMode: stateless
        "})
    }

    #[test]
    fn test_application_cluster() {
        let deployment = application_cluster();
        let conf = effective_config(&deployment, &FlinkConfig::new());

        assert_eq!(Some("flink"), conf.get(NAMESPACE));
        assert_eq!(Some("basic-example"), conf.get(CLUSTER_ID));
        assert_eq!(Some("flink:1.15"), conf.get(CONTAINER_IMAGE));
        assert_eq!(Some("IfNotPresent"), conf.get(CONTAINER_IMAGE_PULL_POLICY));
        assert_eq!(Some("flink"), conf.get(SERVICE_ACCOUNT));
        assert_eq!(Some("2"), conf.get("taskmanager.numberOfTaskSlots"));
        assert_eq!(Some("ClusterIP"), conf.get(REST_SERVICE_EXPOSED_TYPE));
        assert_eq!(Some("false"), conf.get(WEB_CANCEL_ENABLE));
        assert_eq!(Some("2048m"), conf.get(JOB_MANAGER_MEMORY));
        assert_eq!(Some("1"), conf.get(JOB_MANAGER_CPU));
        assert_eq!(Some("1"), conf.get(JOB_MANAGER_REPLICAS));
        assert_eq!(Some("2048m"), conf.get(TASK_MANAGER_MEMORY));
        assert_eq!(Some("0.5"), conf.get(TASK_MANAGER_CPU));
        assert_eq!(Some("kubernetes-application"), conf.get(DEPLOYMENT_TARGET));
        assert_eq!(
            Some("local:///opt/flink/examples/streaming/StateMachineExample.jar"),
            conf.get(PIPELINE_JARS)
        );
        assert_eq!(Some("2"), conf.get(DEFAULT_PARALLELISM));
        assert_eq!(
            Some("8a3e43c45d5f4f7c9c617e5a0a1f6d2b"),
            conf.get(PIPELINE_FIXED_JOB_ID)
        );
        assert_eq!(None, conf.get(CHECKPOINTING_INTERVAL));
    }

    #[test]
    fn test_session_cluster() {
        let deployment = deployment(indoc! {"
            apiVersion: flink.stackable.tech/v1alpha1
            kind: FlinkDeployment
            metadata:
              name: basic-session-cluster
              namespace: flink
            spec:
              flinkVersion: v1_15
              ingress:
                template: '{{name}}.{{namespace}}.flink.k8s.io'
              flinkConfiguration:
                kubernetes.rest-service.exposed.type: LoadBalancer
        "});
        let conf = effective_config(&deployment, &FlinkConfig::new());

        assert_eq!(Some("kubernetes-session"), conf.get(DEPLOYMENT_TARGET));
        assert_eq!(Some("ClusterIP"), conf.get(REST_SERVICE_EXPOSED_TYPE));
        assert_eq!(None, conf.get(WEB_CANCEL_ENABLE));
        assert_eq!(None, conf.get(PIPELINE_FIXED_JOB_ID));
    }

    #[test]
    fn test_spec_overrides_operator_defaults() {
        let mut defaults = FlinkConfig::new();
        defaults.set(SAVEPOINT_DIRECTORY, "s3://defaults/savepoints");
        defaults.set(HIGH_AVAILABILITY, "NONE");
        defaults.set(WEB_CANCEL_ENABLE, "true");

        let mut deployment = application_cluster();
        deployment
            .spec
            .flink_configuration
            .insert(HIGH_AVAILABILITY.to_string(), "kubernetes".to_string());
        let conf = effective_config(&deployment, &defaults);

        assert_eq!(Some("s3://defaults/savepoints"), conf.get(SAVEPOINT_DIRECTORY));
        assert!(conf.is_high_availability_enabled());
        assert_eq!(Some("true"), conf.get(WEB_CANCEL_ENABLE));
    }

    #[test]
    fn test_last_state_checkpointing_interval() {
        let mut deployment = application_cluster();
        if let Some(job) = deployment.spec.job.as_mut() {
            job.upgrade_mode = UpgradeMode::LastState;
        }
        let conf = effective_config(&deployment, &FlinkConfig::new());
        assert_eq!(
            Some(DEFAULT_CHECKPOINTING_INTERVAL),
            conf.get(CHECKPOINTING_INTERVAL)
        );

        deployment
            .spec
            .flink_configuration
            .insert(CHECKPOINTING_INTERVAL.to_string(), "30 s".to_string());
        let conf = effective_config(&deployment, &FlinkConfig::new());
        assert_eq!(Some("30 s"), conf.get(CHECKPOINTING_INTERVAL));
    }

    #[test]
    fn test_steps_are_independent() {
        let deployment = application_cluster();
        let conf = FlinkConfigBuilder::new(&deployment.metadata, &deployment.spec, &FlinkConfig::new())
            .apply_image()
            .build();

        assert_eq!(Some("flink:1.15"), conf.get(CONTAINER_IMAGE));
        assert_eq!(None, conf.get(DEPLOYMENT_TARGET));
        assert_eq!(None, conf.get(JOB_MANAGER_MEMORY));
    }

    #[test]
    fn test_application_job_id_requires_uid() {
        assert_eq!(None, application_job_id(&ObjectMeta::default()));
    }
}
