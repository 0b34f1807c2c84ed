use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus, Pod, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use super::{ClusterApi, ClusterError};

const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Cluster calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListNamespaces,
    GetNamespace,
    CreateNamespace,
    DeleteNamespace,
    ListPods,
    DeletePod,
    ListSecrets,
    GetSecret,
    CreateSecret,
    CreateServiceAccount,
    CreateRoleBinding,
}

#[derive(Default)]
struct State {
    resource_version: u64,
    namespaces: Vec<Namespace>,
    pods: Vec<Pod>,
    secrets: Vec<Secret>,
    service_accounts: Vec<ServiceAccount>,
    role_bindings: Vec<RoleBinding>,
    failures: HashMap<Operation, u32>,
    calls: HashMap<Operation, u32>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn stamp(&mut self, meta: &mut ObjectMeta, namespace: Option<&str>) {
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_resource_version());
        meta.creation_timestamp = Some(Time(Utc::now()));
        if let Some(namespace) = namespace {
            meta.namespace = Some(namespace.to_string());
        }
    }

    fn namespace_exists(&self, name: &str) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.metadata.name.as_deref() == Some(name))
    }

    fn begin(&mut self, op: Operation) -> Result<(), ClusterError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Api {
                    code: Some(500),
                    message: format!("injected failure for {:?}", op),
                });
            }
        }
        Ok(())
    }
}

fn name_of(meta: &ObjectMeta) -> Result<String, ClusterError> {
    meta.name
        .clone()
        .ok_or_else(|| ClusterError::Api {
            code: Some(422),
            message: "metadata.name is required".into(),
        })
}

fn in_namespace(meta: &ObjectMeta, namespace: &str, name: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace) && meta.name.as_deref() == Some(name)
}

/// In-process, strongly consistent stand-in for the control plane.
///
/// Objects are listed in insertion order. Deleting a namespace removes every
/// object inside it. Secrets of type `kubernetes.io/service-account-token`
/// get a generated `token` on creation, the way the token controller fills
/// them in on a real cluster.
pub struct MemoryCluster {
    state: Mutex<State>,
    populate_tokens: bool,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            populate_tokens: true,
        }
    }

    /// A cluster whose token controller never fills in service account tokens.
    pub fn without_token_controller() -> Self {
        Self {
            state: Mutex::new(State::default()),
            populate_tokens: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `times` calls of `op` fail with a server error.
    pub fn fail_next(&self, op: Operation, times: u32) {
        self.lock().failures.insert(op, times);
    }

    /// Number of times `op` has been invoked, failed calls included.
    pub fn calls(&self, op: Operation) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Store a namespace as given, keeping its creation timestamp.
    pub fn insert_namespace(&self, mut namespace: Namespace) {
        let mut state = self.lock();
        if namespace.metadata.uid.is_none() {
            namespace.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        namespace.metadata.resource_version = Some(state.next_resource_version());
        state.namespaces.push(namespace);
    }

    /// Store a pod as given, keeping its namespace and creation timestamp.
    pub fn insert_pod(&self, mut pod: Pod) {
        let mut state = self.lock();
        pod.metadata.resource_version = Some(state.next_resource_version());
        state.pods.push(pod);
    }

    /// Store a secret as given.
    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.lock();
        secret.metadata.resource_version = Some(state.next_resource_version());
        state.secrets.push(secret);
    }

    pub fn service_accounts(&self, namespace: &str) -> Vec<ServiceAccount> {
        self.lock()
            .service_accounts
            .iter()
            .filter(|sa| sa.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect()
    }

    pub fn role_bindings(&self, namespace: &str) -> Vec<RoleBinding> {
        self.lock()
            .role_bindings
            .iter()
            .filter(|rb| rb.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect()
    }

    fn generated_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::ListNamespaces)?;
        Ok(state.namespaces.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::GetNamespace)?;
        state
            .namespaces
            .iter()
            .find(|ns| ns.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("namespaces \"{}\" not found", name)))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::CreateNamespace)?;
        let name = name_of(&namespace.metadata)?;
        if state.namespace_exists(&name) {
            return Err(ClusterError::AlreadyExists(format!(
                "namespaces \"{}\" already exists",
                name
            )));
        }
        let mut created = namespace.clone();
        state.stamp(&mut created.metadata, None);
        created.status = Some(NamespaceStatus {
            phase: Some("Active".to_string()),
            ..Default::default()
        });
        state.namespaces.push(created.clone());
        Ok(created)
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::DeleteNamespace)?;
        if !state.namespace_exists(name) {
            return Err(ClusterError::NotFound(format!(
                "namespaces \"{}\" not found",
                name
            )));
        }
        state
            .namespaces
            .retain(|ns| ns.metadata.name.as_deref() != Some(name));
        state
            .pods
            .retain(|pod| pod.metadata.namespace.as_deref() != Some(name));
        state
            .secrets
            .retain(|secret| secret.metadata.namespace.as_deref() != Some(name));
        state
            .service_accounts
            .retain(|sa| sa.metadata.namespace.as_deref() != Some(name));
        state
            .role_bindings
            .retain(|rb| rb.metadata.namespace.as_deref() != Some(name));
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::ListPods)?;
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| match label_selector {
                // Only existence selectors ("key") are understood here.
                Some(key) => pod
                    .metadata
                    .labels
                    .as_ref()
                    .map_or(false, |labels| labels.contains_key(key)),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::DeletePod)?;
        let before = state.pods.len();
        state
            .pods
            .retain(|pod| !in_namespace(&pod.metadata, namespace, name));
        if state.pods.len() == before {
            return Err(ClusterError::NotFound(format!(
                "pods \"{}\" not found",
                name
            )));
        }
        Ok(())
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::ListSecrets)?;
        Ok(state
            .secrets
            .iter()
            .filter(|secret| secret.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::GetSecret)?;
        state
            .secrets
            .iter()
            .find(|secret| in_namespace(&secret.metadata, namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("secrets \"{}\" not found", name)))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::CreateSecret)?;
        let name = name_of(&secret.metadata)?;
        if !state.namespace_exists(namespace) {
            return Err(ClusterError::NotFound(format!(
                "namespaces \"{}\" not found",
                namespace
            )));
        }
        if state
            .secrets
            .iter()
            .any(|s| in_namespace(&s.metadata, namespace, &name))
        {
            return Err(ClusterError::AlreadyExists(format!(
                "secrets \"{}\" already exists",
                name
            )));
        }
        let mut created = secret.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        if self.populate_tokens && created.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
            let data = created.data.get_or_insert_with(BTreeMap::new);
            data.insert(
                "token".to_string(),
                ByteString(Self::generated_token().into_bytes()),
            );
        }
        state.secrets.push(created.clone());
        Ok(created)
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::CreateServiceAccount)?;
        let name = name_of(&service_account.metadata)?;
        if !state.namespace_exists(namespace) {
            return Err(ClusterError::NotFound(format!(
                "namespaces \"{}\" not found",
                namespace
            )));
        }
        if state
            .service_accounts
            .iter()
            .any(|sa| in_namespace(&sa.metadata, namespace, &name))
        {
            return Err(ClusterError::AlreadyExists(format!(
                "serviceaccounts \"{}\" already exists",
                name
            )));
        }
        let mut created = service_account.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        state.service_accounts.push(created.clone());
        Ok(created)
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        role_binding: &RoleBinding,
    ) -> Result<RoleBinding, ClusterError> {
        let mut state = self.lock();
        state.begin(Operation::CreateRoleBinding)?;
        let name = name_of(&role_binding.metadata)?;
        if !state.namespace_exists(namespace) {
            return Err(ClusterError::NotFound(format!(
                "namespaces \"{}\" not found",
                namespace
            )));
        }
        if state
            .role_bindings
            .iter()
            .any(|rb| in_namespace(&rb.metadata, namespace, &name))
        {
            return Err(ClusterError::AlreadyExists(format!(
                "rolebindings.rbac.authorization.k8s.io \"{}\" already exists",
                name
            )));
        }
        let mut created = role_binding.clone();
        state.stamp(&mut created.metadata, Some(namespace));
        state.role_bindings.push(created.clone());
        Ok(created)
    }
}
