use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

use super::{ClusterApi, ClusterError};

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            // Other conflicts, such as deleting a terminating namespace,
            // stay plain API errors.
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                ClusterError::AlreadyExists(resp.message)
            }
            kube::Error::Api(resp) => ClusterError::Api {
                code: Some(resp.code),
                message: resp.message,
            },
            other => ClusterError::api(other.to_string()),
        }
    }
}

/// [`ClusterApi`] backed by a kube-rs client.
///
/// Every call is bounded by `call_timeout`. Callers that drop the returned
/// future cancel the in-flight request.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    call_timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    /// Build a client from the in-cluster service account, falling back to
    /// the local kubeconfig.
    pub async fn try_default(call_timeout: Duration) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, call_timeout))
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        debug!(operation, "cluster call");
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(ClusterError::from),
            Err(_) => Err(ClusterError::Timeout {
                operation,
                after: self.call_timeout,
            }),
        }
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        let api = self.namespaces();
        let list = self
            .bounded("list_namespaces", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        let api = self.namespaces();
        self.bounded("get_namespace", api.get(name)).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let api = self.namespaces();
        self.bounded(
            "create_namespace",
            api.create(&PostParams::default(), namespace),
        )
        .await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api = self.namespaces();
        self.bounded("delete_namespace", api.delete(name, &DeleteParams::default()))
            .await?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ClusterError> {
        let api = self.pods(namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self.bounded("list_pods", api.list(&params)).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api = self.pods(namespace);
        self.bounded("delete_pod", api.delete(name, &DeleteParams::default()))
            .await?;
        Ok(())
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, ClusterError> {
        let api = self.secrets(namespace);
        let list = self
            .bounded("list_secrets", api.list(&ListParams::default()))
            .await?;
        Ok(list.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let api = self.secrets(namespace);
        self.bounded("get_secret", api.get(name)).await
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ClusterError> {
        let api = self.secrets(namespace);
        self.bounded("create_secret", api.create(&PostParams::default(), secret))
            .await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        self.bounded(
            "create_service_account",
            api.create(&PostParams::default(), service_account),
        )
        .await
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        role_binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        self.bounded(
            "create_role_binding",
            api.create(&PostParams::default(), role_binding),
        )
        .await
    }
}
