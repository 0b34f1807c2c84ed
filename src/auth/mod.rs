//! Bearer-token authorization.
//!
//! Owners are identified by pre-provisioned secrets in the service's own
//! namespace. A request is authorized when the raw `Authorization` header
//! equals the token of exactly one eligible secret; the secret's name is the
//! owner identity threaded through every ownership check.

use thiserror::Error;
use tracing::{debug, error};

use crate::cluster::{ClusterError, SharedCluster};
use crate::models::credential::OwnerCredential;

/// Owner reported for denied requests.
pub const NO_OWNER: &str = "NO_OWNER";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to read owner credentials in namespace {namespace}: {source}")]
    CredentialRead {
        namespace: String,
        #[source]
        source: ClusterError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Granted(String),
    Denied,
}

impl AuthDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthDecision::Granted(_))
    }

    pub fn owner(&self) -> &str {
        match self {
            AuthDecision::Granted(owner) => owner,
            AuthDecision::Denied => NO_OWNER,
        }
    }
}

/// Reads owner credential records from the service namespace.
#[derive(Clone)]
pub struct CredentialStore {
    cluster: SharedCluster,
    namespace: String,
}

impl CredentialStore {
    pub fn new(cluster: SharedCluster, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// All credential records, in listing order.
    pub async fn credentials(&self) -> Result<Vec<OwnerCredential>, AuthError> {
        let secrets = self
            .cluster
            .list_secrets(&self.namespace)
            .await
            .map_err(|source| AuthError::CredentialRead {
                namespace: self.namespace.clone(),
                source,
            })?;
        Ok(secrets.iter().map(OwnerCredential::from).collect())
    }
}

#[derive(Clone)]
pub struct AuthorizationGate {
    store: CredentialStore,
}

impl AuthorizationGate {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    /// Resolve a presented token to an owner.
    ///
    /// A missing or empty token is denied without reading credentials. If
    /// more than one eligible record carries the token the request is denied:
    /// listing order is not stable, so no owner can be chosen safely.
    /// A credential read failure is an error, never a grant.
    pub async fn authorize(&self, presented: Option<&str>) -> Result<AuthDecision, AuthError> {
        let presented = match presented {
            Some(token) if !token.is_empty() => token,
            _ => {
                debug!("request carried no credential");
                return Ok(AuthDecision::Denied);
            }
        };

        let credentials = self.store.credentials().await?;
        let mut matches = credentials.iter().filter(|c| c.matches(presented));

        match (matches.next(), matches.next()) {
            (Some(credential), None) => Ok(AuthDecision::Granted(credential.name.clone())),
            (Some(first), Some(second)) => {
                error!(
                    namespace = %self.store.namespace(),
                    first = %first.name,
                    second = %second.name,
                    "token is shared by several owner credentials, denying"
                );
                Ok(AuthDecision::Denied)
            }
            (None, _) => {
                debug!("no owner credential matches presented token");
                Ok(AuthDecision::Denied)
            }
        }
    }
}
