//! Command line and environment configuration of the operator process.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};
use stackable_flink_crd::flink_config::FlinkConfig;
use stackable_operator::{cli::ProductOperatorRun, time::Duration};

pub const FLINK_CONF_FILE_NAME: &str = "flink-conf.yaml";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read the default Flink configuration from {}", path.display()))]
    ReadFlinkConf {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the default Flink configuration in {}", path.display()))]
    ParseFlinkConf {
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(clap::Args, Debug)]
pub struct FlinkOperatorRun {
    #[command(flatten)]
    pub common: ProductOperatorRun,

    #[command(flatten)]
    pub operator: FlinkOperatorConfig,
}

#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct FlinkOperatorConfig {
    /// Time between two reconciliations of a stable resource
    #[arg(long, env, default_value = "1m")]
    pub reconcile_interval: Duration,

    /// Time between two reconciliations while a deployment or savepoint is in progress
    #[arg(long, env, default_value = "10s")]
    pub progress_check_interval: Duration,

    /// Time a triggered savepoint may stay pending before it is considered timed out
    #[arg(long, env, default_value = "10m")]
    pub savepoint_trigger_grace_period: Duration,

    /// Timeout for single requests against the Flink REST API
    #[arg(long, env, default_value = "10s")]
    pub flink_client_timeout: Duration,

    /// Time to wait for a job to be stopped with a savepoint
    #[arg(long, env, default_value = "1m")]
    pub flink_cancel_job_timeout: Duration,

    /// Directory containing the `flink-conf.yaml` with the default Flink configuration of all
    /// managed clusters
    #[arg(long, env)]
    pub flink_conf_dir: Option<PathBuf>,
}

impl Default for FlinkOperatorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_minutes_unchecked(1),
            progress_check_interval: Duration::from_secs(10),
            savepoint_trigger_grace_period: Duration::from_minutes_unchecked(10),
            flink_client_timeout: Duration::from_secs(10),
            flink_cancel_job_timeout: Duration::from_minutes_unchecked(1),
            flink_conf_dir: None,
        }
    }
}

impl FlinkOperatorConfig {
    /// Loads the default Flink configuration. Without a configuration directory the defaults are
    /// empty.
    pub fn load_default_flink_config(&self) -> Result<FlinkConfig> {
        match &self.flink_conf_dir {
            Some(dir) => load_flink_conf(&dir.join(FLINK_CONF_FILE_NAME)),
            None => Ok(FlinkConfig::new()),
        }
    }
}

fn load_flink_conf(path: &Path) -> Result<FlinkConfig> {
    let content = fs::read_to_string(path).context(ReadFlinkConfSnafu { path })?;
    parse_flink_conf(&content).context(ParseFlinkConfSnafu { path })
}

/// Parses the flat `key: value` format of `flink-conf.yaml`. Scalar values of any YAML type are
/// kept as their string representation.
fn parse_flink_conf(content: &str) -> Result<FlinkConfig, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(FlinkConfig::new());
    }
    let entries: Option<BTreeMap<String, serde_yaml::Value>> = serde_yaml::from_str(content)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| scalar_to_string(value).map(|value| (key, value)))
        .collect())
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(value) => Some(value),
        serde_yaml::Value::Bool(value) => Some(value.to_string()),
        serde_yaml::Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use indoc::indoc;
    use stackable_flink_crd::flink_config::{
        HIGH_AVAILABILITY, PERIODIC_SAVEPOINT_INTERVAL, SAVEPOINT_DIRECTORY,
    };

    use super::*;

    #[derive(Parser)]
    struct Opts {
        #[command(flatten)]
        config: FlinkOperatorConfig,
    }

    #[test]
    fn test_default_arguments() {
        let opts = Opts::parse_from(["flink-operator"]);
        assert_eq!(FlinkOperatorConfig::default(), opts.config);
        assert_eq!(
            std::time::Duration::from_secs(600),
            *opts.config.savepoint_trigger_grace_period
        );
    }

    #[test]
    fn test_arguments() {
        let opts = Opts::parse_from([
            "flink-operator",
            "--flink-client-timeout",
            "30s",
            "--reconcile-interval",
            "5m",
            "--flink-conf-dir",
            "/stackable/flink-operator/conf",
        ]);
        assert_eq!(Duration::from_secs(30), opts.config.flink_client_timeout);
        assert_eq!(Duration::from_minutes_unchecked(5), opts.config.reconcile_interval);
        assert_eq!(
            Some(PathBuf::from("/stackable/flink-operator/conf")),
            opts.config.flink_conf_dir
        );
    }

    #[test]
    fn test_parse_flink_conf() {
        let conf = parse_flink_conf(indoc! {"
            high-availability: org.apache.flink.kubernetes.highavailability.KubernetesHaServicesFactory
            state.savepoints.dir: s3://flink/savepoints
            taskmanager.numberOfTaskSlots: 2
            kubernetes.operator.periodic.savepoint.interval: 1h
            web.submit.enable: false
        "})
        .unwrap();

        assert!(conf.is_high_availability_enabled());
        assert_eq!(Some("s3://flink/savepoints"), conf.get(SAVEPOINT_DIRECTORY));
        assert_eq!(Some("2"), conf.get("taskmanager.numberOfTaskSlots"));
        assert_eq!(Some("false"), conf.get("web.submit.enable"));
        assert_eq!(Some("1h"), conf.get(PERIODIC_SAVEPOINT_INTERVAL));
        assert!(conf.contains(HIGH_AVAILABILITY));
    }

    #[test]
    fn test_parse_empty_flink_conf() {
        assert_eq!(FlinkConfig::new(), parse_flink_conf("").unwrap());
    }

    #[test]
    fn test_missing_flink_conf_dir_yields_empty_defaults() {
        assert_eq!(
            FlinkConfig::new(),
            FlinkOperatorConfig::default()
                .load_default_flink_config()
                .unwrap()
        );
    }
}
