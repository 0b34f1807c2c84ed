//! Workspace provisioning as a small saga.
//!
//! A workspace is a namespace plus an `admin` service account, its
//! bootstrap token secret and a `cluster-admin` role binding. The steps run
//! in order and each one is retried on transient errors; a create that hits
//! `AlreadyExists` counts as done, so a retry after a lost response is safe.
//! When a step after the namespace gives up, the namespace is deleted and
//! the control plane garbage-collects whatever part of the bundle exists.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::cluster::{ClusterApi, ClusterError};
use crate::models::credential::TOKEN_KEY;
use crate::models::workspace::{is_owned_by, workspace_namespace};
use crate::retry::{retry_with_backoff, RetryConfig};

pub const ADMIN_SERVICE_ACCOUNT: &str = "admin";
pub const ADMIN_TOKEN_SECRET: &str = "admin-token";
pub const ADMIN_ROLE_BINDING: &str = "admin";
pub const CLUSTER_ADMIN_ROLE: &str = "cluster-admin";
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";
const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    Started,
    NamespaceCreated,
    ServiceAccountCreated,
    TokenSecretCreated,
    RoleBindingCreated,
    Ready,
    RolledBack,
}

impl ProvisioningStep {
    fn next(self) -> Self {
        match self {
            ProvisioningStep::Started => ProvisioningStep::NamespaceCreated,
            ProvisioningStep::NamespaceCreated => ProvisioningStep::ServiceAccountCreated,
            ProvisioningStep::ServiceAccountCreated => ProvisioningStep::TokenSecretCreated,
            ProvisioningStep::TokenSecretCreated => ProvisioningStep::RoleBindingCreated,
            ProvisioningStep::RoleBindingCreated => ProvisioningStep::Ready,
            ProvisioningStep::Ready => ProvisioningStep::Ready,
            ProvisioningStep::RolledBack => ProvisioningStep::RolledBack,
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningStep::Started => "Started",
            ProvisioningStep::NamespaceCreated => "NamespaceCreated",
            ProvisioningStep::ServiceAccountCreated => "ServiceAccountCreated",
            ProvisioningStep::TokenSecretCreated => "TokenSecretCreated",
            ProvisioningStep::RoleBindingCreated => "RoleBindingCreated",
            ProvisioningStep::Ready => "Ready",
            ProvisioningStep::RolledBack => "RolledBack",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rollback {
    /// Nothing was created.
    NotNeeded,
    Completed,
    Failed(String),
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rollback::NotNeeded => f.write_str("nothing to roll back"),
            Rollback::Completed => f.write_str("namespace rolled back"),
            Rollback::Failed(reason) => write!(f, "rollback failed: {}", reason),
        }
    }
}

#[derive(Debug, Error)]
#[error("provisioning of {namespace} failed after {reached}: {reason} ({rollback})")]
pub struct ProvisioningFailure {
    pub namespace: String,
    /// Last step that completed.
    pub reached: ProvisioningStep,
    pub reason: String,
    pub rollback: Rollback,
}

#[derive(Debug, Error)]
enum StepFailure {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("token secret {0} has no token yet")]
    TokenNotPopulated(String),

    #[error("namespace {0} already exists and belongs to another owner")]
    NameTaken(String),
}

impl StepFailure {
    fn is_retryable(&self) -> bool {
        match self {
            StepFailure::Cluster(e) => e.is_transient(),
            StepFailure::TokenNotPopulated(_) => true,
            StepFailure::NameTaken(_) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    /// Retries for each create call and for the rollback delete.
    pub step_retry: RetryConfig,
    /// Polling for the token controller to fill in the bootstrap secret.
    pub token_retry: RetryConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            step_retry: RetryConfig::with_max_attempts(4),
            token_retry: RetryConfig::with_max_attempts(10),
        }
    }
}

pub struct ProvisioningSaga<'a> {
    cluster: &'a dyn ClusterApi,
    config: &'a ProvisioningConfig,
    namespace: String,
    owner: String,
    step: ProvisioningStep,
}

impl<'a> ProvisioningSaga<'a> {
    pub fn new(
        cluster: &'a dyn ClusterApi,
        config: &'a ProvisioningConfig,
        namespace: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            config,
            namespace: namespace.into(),
            owner: owner.into(),
            step: ProvisioningStep::Started,
        }
    }

    /// Drive the saga to `Ready` and return the workspace admin token.
    pub async fn run(mut self) -> Result<String, ProvisioningFailure> {
        let mut token = None;
        loop {
            let outcome = match self.step {
                ProvisioningStep::Started => self.create_namespace().await,
                ProvisioningStep::NamespaceCreated => self.create_service_account().await,
                ProvisioningStep::ServiceAccountCreated => self.create_token_secret().await,
                ProvisioningStep::TokenSecretCreated => self.create_role_binding().await,
                ProvisioningStep::RoleBindingCreated => {
                    self.read_token().await.map(|t| token = Some(t))
                }
                ProvisioningStep::Ready | ProvisioningStep::RolledBack => break,
            };

            if let Err(failure) = outcome {
                return Err(self.roll_back(failure).await);
            }

            self.step = self.step.next();
            debug!(namespace = %self.namespace, step = %self.step, "provisioning step done");
        }

        match token {
            Some(token) => {
                info!(namespace = %self.namespace, owner = %self.owner, "workspace ready");
                Ok(token)
            }
            None => Err(ProvisioningFailure {
                namespace: self.namespace,
                reached: self.step,
                reason: "saga finished without a token".into(),
                rollback: Rollback::NotNeeded,
            }),
        }
    }

    async fn create_namespace(&self) -> Result<(), StepFailure> {
        let namespace = &workspace_namespace(&self.namespace, &self.owner);
        retry_step(&self.config.step_retry, "create_namespace", move || {
            self.try_create_namespace(namespace)
        })
        .await
    }

    async fn try_create_namespace(&self, namespace: &Namespace) -> Result<(), StepFailure> {
        match self.cluster.create_namespace(namespace).await {
            Ok(_) => Ok(()),
            // A retried create whose first response was lost.
            Err(e) if e.is_already_exists() => {
                let existing = self.cluster.get_namespace(&self.namespace).await?;
                if is_owned_by(&existing, &self.owner) {
                    Ok(())
                } else {
                    Err(StepFailure::NameTaken(self.namespace.clone()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_service_account(&self) -> Result<(), StepFailure> {
        let service_account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(ADMIN_SERVICE_ACCOUNT.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        let service_account = &service_account;
        retry_step(&self.config.step_retry, "create_service_account", move || async move {
            ignore_existing(
                self.cluster
                    .create_service_account(&self.namespace, service_account)
                    .await,
            )
        })
        .await
    }

    async fn create_token_secret(&self) -> Result<(), StepFailure> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(ADMIN_TOKEN_SECRET.to_string()),
                namespace: Some(self.namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                    ADMIN_SERVICE_ACCOUNT.to_string(),
                )])),
                ..Default::default()
            },
            type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
            ..Default::default()
        };
        let secret = &secret;
        retry_step(&self.config.step_retry, "create_token_secret", move || async move {
            ignore_existing(self.cluster.create_secret(&self.namespace, secret).await)
        })
        .await
    }

    async fn create_role_binding(&self) -> Result<(), StepFailure> {
        let role_binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(ADMIN_ROLE_BINDING.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: CLUSTER_ADMIN_ROLE.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: ADMIN_SERVICE_ACCOUNT.to_string(),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            }]),
        };
        let role_binding = &role_binding;
        retry_step(&self.config.step_retry, "create_role_binding", move || async move {
            ignore_existing(
                self.cluster
                    .create_role_binding(&self.namespace, role_binding)
                    .await,
            )
        })
        .await
    }

    async fn read_token(&self) -> Result<String, StepFailure> {
        retry_step(&self.config.token_retry, "read_admin_token", move || {
            self.try_read_token()
        })
        .await
    }

    async fn try_read_token(&self) -> Result<String, StepFailure> {
        let secret = self
            .cluster
            .get_secret(&self.namespace, ADMIN_TOKEN_SECRET)
            .await?;
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(TOKEN_KEY))
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| StepFailure::TokenNotPopulated(ADMIN_TOKEN_SECRET.to_string()))
    }

    async fn roll_back(&mut self, failure: StepFailure) -> ProvisioningFailure {
        let reached = self.step;
        let rollback = if reached == ProvisioningStep::Started {
            Rollback::NotNeeded
        } else {
            let cluster = self.cluster;
            let namespace = self.namespace.as_str();
            let deleted = retry_with_backoff(
                &self.config.step_retry,
                "rollback_namespace",
                ClusterError::is_transient,
                move || async move {
                    match cluster.delete_namespace(namespace).await {
                        Err(e) if e.is_not_found() => Ok(()),
                        other => other,
                    }
                },
            )
            .await;
            match deleted {
                Ok(()) => {
                    self.step = ProvisioningStep::RolledBack;
                    Rollback::Completed
                }
                Err(e) => Rollback::Failed(e.to_string()),
            }
        };

        let failure = ProvisioningFailure {
            namespace: self.namespace.clone(),
            reached,
            reason: failure.to_string(),
            rollback,
        };
        error!(error = %failure, "workspace provisioning failed");
        failure
    }
}

async fn retry_step<T, F, Fut>(
    retry: &RetryConfig,
    operation: &str,
    call: F,
) -> Result<T, StepFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StepFailure>>,
{
    retry_with_backoff(retry, operation, StepFailure::is_retryable, call).await
}

fn ignore_existing<T>(result: Result<T, ClusterError>) -> Result<(), StepFailure> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
