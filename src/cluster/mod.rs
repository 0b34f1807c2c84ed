//! Access to the cluster control plane.
//!
//! Everything the service knows about workspaces, credentials and worker
//! pods lives in the cluster. [`ClusterApi`] is the seam between the
//! service and the control plane: [`KubeCluster`] talks to a real API
//! server, [`MemoryCluster`] keeps the same resources in-process for tests
//! and local runs.

pub mod kube_cluster;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use thiserror::Error;

pub use kube_cluster::KubeCluster;
pub use memory::MemoryCluster;

/// Errors surfaced by cluster calls.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("cluster API error: {message}")]
    Api { code: Option<u16>, message: String },
}

impl ClusterError {
    pub fn api(message: impl Into<String>) -> Self {
        ClusterError::Api {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    /// Whether repeating the same call could succeed.
    ///
    /// Timeouts, transport failures, throttling and server-side errors are
    /// transient. Client errors (missing objects, conflicts, forbidden) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Timeout { .. } => true,
            ClusterError::Api { code: None, .. } => true,
            ClusterError::Api { code: Some(code), .. } => *code == 429 || *code >= 500,
            ClusterError::NotFound(_) | ClusterError::AlreadyExists(_) => false,
        }
    }
}

/// The subset of the control-plane API this service uses.
///
/// Listing calls return objects in the order the control plane reports them.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError>;

    /// Delete a namespace. Namespaced resources inside it are garbage
    /// collected by the control plane.
    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError>;

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, ClusterError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;

    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, ClusterError>;

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ClusterError>;

    async fn create_role_binding(
        &self,
        namespace: &str,
        role_binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError>;
}

pub type SharedCluster = Arc<dyn ClusterApi>;
