//! Client for the REST API of a single Flink cluster.
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_flink_crd::flink_config::FlinkConfig;

use super::{JobStatusMessage, SavepointFetchResult};

const SAVEPOINT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("invalid REST endpoint [{url}]"))]
    InvalidUrl { source: UrlParseError, url: String },

    #[snafu(display("failed to build the HTTP client"))]
    BuildHttpClient { source: reqwest::Error },

    #[snafu(display("request to [{url}] failed"))]
    Request {
        source: reqwest::Error,
        url: String,
    },

    #[snafu(display("request to [{url}] was rejected with {status}: {body}"))]
    UnexpectedStatus {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[snafu(display("failed to parse the response of [{url}]"))]
    ParseResponse {
        source: reqwest::Error,
        url: String,
    },

    #[snafu(display("savepoint of job {job_id} failed: {cause}"))]
    SavepointFailed { job_id: String, cause: String },

    #[snafu(display("savepoint of job {job_id} did not complete within {timeout:?}"))]
    SavepointTimeout { job_id: String, timeout: Duration },
}

type Result<T, E = Error> = std::result::Result<T, E>;
type UrlParseError = <Url as std::str::FromStr>::Err;

/// Operations on the jobs of one Flink cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn cancel(&self, job_id: &str) -> Result<()>;

    /// Stops the job with a savepoint and waits until the savepoint is written.
    /// Returns the savepoint location.
    async fn stop_with_savepoint(
        &self,
        job_id: &str,
        advance_to_end_of_event_time: bool,
        savepoint_directory: &str,
    ) -> Result<String>;

    /// Triggers a savepoint and returns the trigger id without waiting for it.
    async fn trigger_savepoint(
        &self,
        job_id: &str,
        target_directory: &str,
        cancel_job: bool,
    ) -> Result<String>;

    async fn savepoint_status(&self, job_id: &str, trigger_id: &str)
        -> Result<SavepointFetchResult>;

    async fn list_jobs(&self) -> Result<Vec<JobStatusMessage>>;
}

/// Creates the client for the cluster described by an effective configuration
#[cfg_attr(test, automock)]
pub trait ClusterClientFactory: Send + Sync {
    fn cluster_client(&self, base_url: Url) -> Result<Box<dyn ClusterClient>>;
}

pub struct RestClusterClientFactory {
    http: reqwest::Client,
    stop_timeout: Duration,
}

impl RestClusterClientFactory {
    pub fn new(request_timeout: Duration, stop_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context(BuildHttpClientSnafu)?;
        Ok(Self { http, stop_timeout })
    }
}

impl ClusterClientFactory for RestClusterClientFactory {
    fn cluster_client(&self, base_url: Url) -> Result<Box<dyn ClusterClient>> {
        Ok(Box::new(RestClusterClient {
            http: self.http.clone(),
            base_url,
            stop_timeout: self.stop_timeout,
        }))
    }
}

/// REST endpoint of the JobManager, served by the `<cluster-id>-rest` service.
pub fn rest_endpoint(cluster_id: &str, namespace: &str, conf: &FlinkConfig) -> Result<Url> {
    let url = format!(
        "http://{cluster_id}-rest.{namespace}:{port}/",
        port = conf.rest_port()
    );
    Url::parse(&url).context(InvalidUrlSnafu { url })
}

pub struct RestClusterClient {
    http: reqwest::Client,
    base_url: Url,
    stop_timeout: Duration,
}

impl RestClusterClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|_| RequestSnafu { url: url.clone() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return UnexpectedStatusSnafu { url, status, body }.fail();
        }
        Ok(response)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.url(path);
        self.send(method, path, body)
            .await?
            .json()
            .await
            .context(ParseResponseSnafu { url })
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.send::<()>(Method::PATCH, &format!("jobs/{job_id}?mode=cancel"), None)
            .await?;
        Ok(())
    }

    async fn stop_with_savepoint(
        &self,
        job_id: &str,
        advance_to_end_of_event_time: bool,
        savepoint_directory: &str,
    ) -> Result<String> {
        let trigger: TriggerResponse = self
            .send_json(
                Method::POST,
                &format!("jobs/{job_id}/stop"),
                Some(&StopWithSavepointRequest {
                    target_directory: savepoint_directory,
                    drain: advance_to_end_of_event_time,
                }),
            )
            .await?;
        tracing::info!(
            job.id = job_id,
            trigger.id = %trigger.request_id,
            "Stopping job with savepoint"
        );

        let poll = async {
            loop {
                match self.savepoint_status(job_id, &trigger.request_id).await? {
                    SavepointFetchResult::Completed { location } => return Ok(location),
                    SavepointFetchResult::Failed { cause } => {
                        return SavepointFailedSnafu { job_id, cause }.fail()
                    }
                    SavepointFetchResult::Pending => {
                        tokio::time::sleep(SAVEPOINT_POLL_INTERVAL).await
                    }
                }
            }
        };
        match tokio::time::timeout(self.stop_timeout, poll).await {
            Ok(result) => result,
            Err(_) => SavepointTimeoutSnafu {
                job_id,
                timeout: self.stop_timeout,
            }
            .fail(),
        }
    }

    async fn trigger_savepoint(
        &self,
        job_id: &str,
        target_directory: &str,
        cancel_job: bool,
    ) -> Result<String> {
        let trigger: TriggerResponse = self
            .send_json(
                Method::POST,
                &format!("jobs/{job_id}/savepoints"),
                Some(&SavepointTriggerRequest {
                    target_directory,
                    cancel_job,
                }),
            )
            .await?;
        Ok(trigger.request_id)
    }

    async fn savepoint_status(
        &self,
        job_id: &str,
        trigger_id: &str,
    ) -> Result<SavepointFetchResult> {
        let result: AsynchronousOperationResult = self
            .send_json::<(), _>(
                Method::GET,
                &format!("jobs/{job_id}/savepoints/{trigger_id}"),
                None,
            )
            .await?;
        Ok(result.into())
    }

    async fn list_jobs(&self) -> Result<Vec<JobStatusMessage>> {
        let overview: JobsOverview = self
            .send_json::<(), _>(Method::GET, "jobs/overview", None)
            .await?;
        Ok(overview.jobs.into_iter().map(Into::into).collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopWithSavepointRequest<'a> {
    target_directory: &'a str,
    drain: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct SavepointTriggerRequest<'a> {
    target_directory: &'a str,
    cancel_job: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TriggerResponse {
    request_id: String,
}

#[derive(Deserialize)]
struct JobsOverview {
    jobs: Vec<JobOverview>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JobOverview {
    jid: String,
    name: String,
    state: String,
    start_time: i64,
}

impl From<JobOverview> for JobStatusMessage {
    fn from(job: JobOverview) -> Self {
        Self {
            job_id: job.jid,
            job_name: job.name,
            job_state: job.state,
            start_time: job.start_time,
        }
    }
}

#[derive(Deserialize)]
struct AsynchronousOperationResult {
    status: QueueStatus,
    #[serde(default)]
    operation: Option<SavepointOperation>,
}

#[derive(Deserialize)]
struct QueueStatus {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SavepointOperation {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    failure_cause: Option<SerializedThrowable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SerializedThrowable {
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    stack_trace: Option<String>,
}

impl SerializedThrowable {
    /// First line of the stack trace, which carries the exception message
    fn summary(&self) -> String {
        self.stack_trace
            .as_deref()
            .and_then(|trace| trace.lines().next())
            .or(self.class.as_deref())
            .unwrap_or("unknown failure")
            .trim()
            .to_string()
    }
}

impl From<AsynchronousOperationResult> for SavepointFetchResult {
    fn from(result: AsynchronousOperationResult) -> Self {
        if result.status.id != "COMPLETED" {
            return SavepointFetchResult::Pending;
        }
        let operation = result.operation.as_ref();
        if let Some(failure) = operation.and_then(|op| op.failure_cause.as_ref()) {
            return SavepointFetchResult::Failed {
                cause: failure.summary(),
            };
        }
        match operation.and_then(|op| op.location.clone()) {
            Some(location) => SavepointFetchResult::Completed { location },
            None => SavepointFetchResult::Failed {
                cause: "savepoint completed without a location".to_string(),
            },
        }
    }
}
