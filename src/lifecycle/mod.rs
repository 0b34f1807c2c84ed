//! Owner-scoped workspace lifecycle.
//!
//! Every operation authorizes the presented token first; the resolved owner
//! is then checked against the workspace's owner annotation before any
//! cluster data is returned or changed.

pub mod provisioning;

use tracing::{debug, info, warn};

use crate::auth::AuthorizationGate;
use crate::cluster::SharedCluster;
use crate::error::LifecycleError;
use crate::models::workspace::{
    generate_workspace_name, is_owned_by, is_workspace, is_workspace_name, WorkspaceDescriptor,
    WorkspaceStatus,
};

use self::provisioning::{ProvisioningConfig, ProvisioningSaga};

pub struct NamespaceLifecycleManager {
    cluster: SharedCluster,
    gate: AuthorizationGate,
    provisioning: ProvisioningConfig,
}

impl NamespaceLifecycleManager {
    pub fn new(
        cluster: SharedCluster,
        gate: AuthorizationGate,
        provisioning: ProvisioningConfig,
    ) -> Self {
        Self {
            cluster,
            gate,
            provisioning,
        }
    }

    async fn owner(&self, credential: Option<&str>) -> Result<String, LifecycleError> {
        let decision = self.gate.authorize(credential).await?;
        if !decision.is_granted() {
            debug!(owner = %decision.owner(), "request not authorized");
            return Err(LifecycleError::Unauthorized);
        }
        Ok(decision.owner().to_string())
    }

    /// Create and provision a new workspace for the caller.
    pub async fn create(
        &self,
        credential: Option<&str>,
    ) -> Result<WorkspaceDescriptor, LifecycleError> {
        let owner = self.owner(credential).await?;
        let name = generate_workspace_name();
        info!(namespace = %name, owner = %owner, "creating workspace");

        let token = ProvisioningSaga::new(self.cluster.as_ref(), &self.provisioning, &name, &owner)
            .run()
            .await
            .map_err(|failure| LifecycleError::Internal(failure.to_string()))?;

        Ok(WorkspaceDescriptor::new(name, token))
    }

    /// Status of one of the caller's workspaces.
    pub async fn get(
        &self,
        credential: Option<&str>,
        name: &str,
    ) -> Result<WorkspaceStatus, LifecycleError> {
        let owner = self.owner(credential).await?;
        let namespace = self.owned_namespace(&owner, name).await?;
        Ok(WorkspaceStatus::from(namespace))
    }

    /// Names of the caller's workspaces in cluster listing order.
    pub async fn list(&self, credential: Option<&str>) -> Result<Vec<String>, LifecycleError> {
        let owner = self.owner(credential).await?;
        let namespaces = self
            .cluster
            .list_namespaces()
            .await
            .map_err(|e| LifecycleError::Internal(e.to_string()))?;

        Ok(namespaces
            .into_iter()
            .filter(|ns| is_workspace(ns) && is_owned_by(ns, &owner))
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    /// Delete one of the caller's workspaces. The provisioned bundle goes
    /// with it.
    pub async fn delete(
        &self,
        credential: Option<&str>,
        name: &str,
    ) -> Result<String, LifecycleError> {
        let owner = self.owner(credential).await?;
        self.owned_namespace(&owner, name).await?;

        self.cluster
            .delete_namespace(name)
            .await
            .map_err(|e| LifecycleError::Internal(e.to_string()))?;

        info!(namespace = %name, owner = %owner, "workspace deleted");
        Ok(format!("Namespace {} deleted", name))
    }

    /// Look up `name` on behalf of `owner`. Anything short of an existing
    /// workspace annotated with that owner is `NotFound`.
    async fn owned_namespace(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<k8s_openapi::api::core::v1::Namespace, LifecycleError> {
        if !is_workspace_name(name) {
            debug!(namespace = %name, "name outside workspace convention");
            return Err(LifecycleError::NotFound);
        }

        let namespace = match self.cluster.get_namespace(name).await {
            Ok(namespace) => namespace,
            Err(e) if e.is_not_found() => return Err(LifecycleError::NotFound),
            Err(e) => {
                warn!(namespace = %name, error = %e, "namespace lookup failed");
                return Err(LifecycleError::NotFound);
            }
        };

        if !is_owned_by(&namespace, owner) {
            debug!(namespace = %name, owner = %owner, "ownership mismatch");
            return Err(LifecycleError::NotFound);
        }
        Ok(namespace)
    }
}
