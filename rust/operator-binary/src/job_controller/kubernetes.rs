//! JobManager deployments of Flink clusters as seen through the Kubernetes API.
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use snafu::ResultExt;
use stackable_operator::{
    k8s_openapi::api::apps::v1::Deployment,
    kube::{
        api::{DeleteParams, PropagationPolicy},
        Api,
    },
};

use super::{DeleteClusterDeploymentSnafu, GetClusterDeploymentSnafu, Result};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDeployments: Send + Sync {
    /// Deletes the JobManager deployment of a cluster. A deployment that is already gone counts
    /// as deleted.
    async fn delete_cluster_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// `None` if the deployment does not exist, otherwise whether at least one JobManager is
    /// available.
    async fn cluster_deployment_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>>;
}

pub struct KubernetesClusterDeployments {
    client: stackable_operator::client::Client,
}

impl KubernetesClusterDeployments {
    pub fn new(client: stackable_operator::client::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        self.client.get_api::<Deployment>(namespace)
    }
}

#[async_trait]
impl ClusterDeployments for KubernetesClusterDeployments {
    async fn delete_cluster_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..DeleteParams::default()
        };
        match self.api(namespace).delete(name, &params).await {
            Ok(_) => {
                tracing::info!(namespace, name, "Deleted JobManager deployment");
                Ok(())
            }
            Err(stackable_operator::kube::Error::Api(response)) if response.code == 404 => {
                tracing::debug!(namespace, name, "JobManager deployment already deleted");
                Ok(())
            }
            Err(source) => Err(source).context(DeleteClusterDeploymentSnafu { namespace, name }),
        }
    }

    async fn cluster_deployment_ready(&self, namespace: &str, name: &str) -> Result<Option<bool>> {
        let deployment = self
            .client
            .get_opt::<Deployment>(name, namespace)
            .await
            .context(GetClusterDeploymentSnafu { namespace, name })?;
        Ok(deployment.map(|deployment| is_available(&deployment)))
    }
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .is_some_and(|available| available > 0)
}
