//! The flat Flink configuration map and the configuration keys the operator reads or manages.
use std::{collections::BTreeMap, time::Duration};

pub const HIGH_AVAILABILITY: &str = "high-availability";
pub const HIGH_AVAILABILITY_TYPE: &str = "high-availability.type";
pub const HIGH_AVAILABILITY_STORAGE_DIR: &str = "high-availability.storageDir";
pub const SAVEPOINT_DIRECTORY: &str = "state.savepoints.dir";
pub const NAMESPACE: &str = "kubernetes.namespace";
pub const CLUSTER_ID: &str = "kubernetes.cluster-id";
pub const JOB_MANAGER_REPLICAS: &str = "kubernetes.jobmanager.replicas";
pub const JOB_MANAGER_MEMORY: &str = "jobmanager.memory.process.size";
pub const TASK_MANAGER_MEMORY: &str = "taskmanager.memory.process.size";
pub const JOB_MANAGER_CPU: &str = "kubernetes.jobmanager.cpu";
pub const TASK_MANAGER_CPU: &str = "kubernetes.taskmanager.cpu";
pub const CONTAINER_IMAGE: &str = "kubernetes.container.image";
pub const CONTAINER_IMAGE_PULL_POLICY: &str = "kubernetes.container.image.pull-policy";
pub const SERVICE_ACCOUNT: &str = "kubernetes.service-account";
pub const REST_SERVICE_EXPOSED_TYPE: &str = "kubernetes.rest-service.exposed.type";
pub const WEB_CANCEL_ENABLE: &str = "web.cancel.enable";
pub const CHECKPOINTING_INTERVAL: &str = "execution.checkpointing.interval";
pub const DEPLOYMENT_TARGET: &str = "execution.target";
pub const PIPELINE_JARS: &str = "pipeline.jars";
pub const DEFAULT_PARALLELISM: &str = "parallelism.default";
pub const REST_PORT: &str = "rest.port";
pub const PIPELINE_FIXED_JOB_ID: &str = "$internal.pipeline.job-id";
pub const PERIODIC_SAVEPOINT_INTERVAL: &str = "kubernetes.operator.periodic.savepoint.interval";

pub const DEFAULT_REST_PORT: u16 = 8081;

const HIGH_AVAILABILITY_NONE: &str = "NONE";

/// Effective Flink configuration of a cluster.
///
/// Values are kept as the strings Flink would read from `flink-conf.yaml`, only the few keys
/// interpreted by the operator are parsed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlinkConfig(BTreeMap<String, String>);

impl FlinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the value of `key` unless it is missing or blank
    pub fn get_non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets `key` only if it is not configured yet
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// High availability counts as enabled when a mode other than `NONE` is configured.
    pub fn is_high_availability_enabled(&self) -> bool {
        self.get_non_blank(HIGH_AVAILABILITY)
            .or_else(|| self.get_non_blank(HIGH_AVAILABILITY_TYPE))
            .is_some_and(|mode| !mode.trim().eq_ignore_ascii_case(HIGH_AVAILABILITY_NONE))
    }

    pub fn savepoint_directory(&self) -> Option<&str> {
        self.get_non_blank(SAVEPOINT_DIRECTORY)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_non_blank(NAMESPACE)
    }

    pub fn cluster_id(&self) -> Option<&str> {
        self.get_non_blank(CLUSTER_ID)
    }

    pub fn rest_port(&self) -> u16 {
        self.get_non_blank(REST_PORT)
            .and_then(|port| port.trim().parse().ok())
            .unwrap_or(DEFAULT_REST_PORT)
    }

    /// Interval between periodic savepoints. Unset, unparseable and zero intervals disable
    /// periodic savepoints.
    pub fn periodic_savepoint_interval(&self) -> Option<Duration> {
        self.get_non_blank(PERIODIC_SAVEPOINT_INTERVAL)
            .and_then(parse_duration)
            .filter(|interval| !interval.is_zero())
    }
}

impl From<BTreeMap<String, String>> for FlinkConfig {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for FlinkConfig {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parses durations in Flink notation, e.g. `30 s`, `5min`, `1h` or plain milliseconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let millis = match unit.trim().to_lowercase().as_str() {
        "" | "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => amount,
        "s" | "sec" | "secs" | "second" | "seconds" => amount.checked_mul(1_000)?,
        "m" | "min" | "minute" | "minutes" => amount.checked_mul(60_000)?,
        "h" | "hour" | "hours" => amount.checked_mul(3_600_000)?,
        "d" | "day" | "days" => amount.checked_mul(86_400_000)?,
        _ => return None,
    };
    Some(Duration::from_millis(millis))
}
