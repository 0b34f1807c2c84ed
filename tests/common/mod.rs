// Shared setup for the HTTP integration tests: a real axum server on an
// ephemeral port backed by an in-memory cluster.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tokio::net::TcpListener;
use tokio::sync::watch;
use zombie_ns::api::{api_router, serve, AppState};
use zombie_ns::auth::{AuthorizationGate, CredentialStore};
use zombie_ns::cluster::memory::MemoryCluster;
use zombie_ns::lifecycle::provisioning::ProvisioningConfig;
use zombie_ns::lifecycle::NamespaceLifecycleManager;
use zombie_ns::models::credential::{ROLE_ANNOTATION, TOKEN_KEY};

pub const SERVICE_NAMESPACE: &str = "zombie-ns-system";

pub struct TestServer {
    pub base_url: String,
    pub cluster: Arc<MemoryCluster>,
    shutdown: watch::Sender<bool>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn credential_secret(name: &str, role: &str, token: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(SERVICE_NAMESPACE.into()),
            annotations: Some(BTreeMap::from([(
                ROLE_ANNOTATION.to_string(),
                role.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            TOKEN_KEY.to_string(),
            ByteString(token.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Start the API with credentials alice/T1 and bob/T2 installed.
pub async fn start() -> TestServer {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.insert_secret(credential_secret("alice", "user", "T1"));
    cluster.insert_secret(credential_secret("bob", "user", "T2"));
    cluster.insert_secret(credential_secret("carol", "admin", "T3"));

    let gate = AuthorizationGate::new(CredentialStore::new(cluster.clone(), SERVICE_NAMESPACE));
    let manager =
        NamespaceLifecycleManager::new(cluster.clone(), gate, ProvisioningConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(serve(listener, api_router(AppState::new(manager)), rx));

    TestServer {
        base_url: format!("http://{}", addr),
        cluster,
        shutdown,
    }
}
