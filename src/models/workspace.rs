use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const WORKSPACE_PREFIX: &str = "zombie-";
pub const OWNER_ANNOTATION: &str = "parity.io/owner";

const NAME_SUFFIX_LEN: usize = 32;
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `zombie-` followed by 32 random lowercase alphanumerics.
///
/// Uniqueness is not checked against the cluster.
pub fn generate_workspace_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NAME_SUFFIX_LEN)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", WORKSPACE_PREFIX, suffix)
}

pub fn is_workspace_name(name: &str) -> bool {
    name.starts_with(WORKSPACE_PREFIX)
}

pub fn is_workspace(namespace: &Namespace) -> bool {
    namespace
        .metadata
        .name
        .as_deref()
        .map_or(false, is_workspace_name)
}

pub fn owner_of(namespace: &Namespace) -> Option<&str> {
    namespace
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(OWNER_ANNOTATION))
        .map(String::as_str)
}

pub fn is_owned_by(namespace: &Namespace, owner: &str) -> bool {
    owner_of(namespace) == Some(owner)
}

/// The namespace object submitted when a workspace is created.
pub fn workspace_namespace(name: &str, owner: &str) -> Namespace {
    let mut annotations = BTreeMap::new();
    annotations.insert(OWNER_ANNOTATION.to_string(), owner.to_string());
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Returned once, when a workspace has been provisioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceDescriptor {
    #[serde(rename = "namespace")]
    pub name: String,
    pub token: String,
    pub message: String,
}

impl WorkspaceDescriptor {
    pub fn new(name: String, token: String) -> Self {
        let message = format!("Successfully created namespace {}", name);
        Self {
            name,
            token,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceStatus {
    #[serde(rename = "namespace")]
    pub name: String,
    #[serde(rename = "status")]
    pub phase: Option<String>,
    #[serde(rename = "creationTime")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub uid: Option<String>,
    #[serde(rename = "resourceVersion")]
    pub resource_version: Option<String>,
}

impl From<Namespace> for WorkspaceStatus {
    fn from(namespace: Namespace) -> Self {
        let Namespace {
            metadata, status, ..
        } = namespace;
        Self {
            name: metadata.name.unwrap_or_default(),
            phase: status.and_then(|s| s.phase),
            creation_timestamp: metadata.creation_timestamp.map(|t| t.0),
            uid: metadata.uid,
            resource_version: metadata.resource_version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceList {
    pub namespaces: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_follow_convention() {
        for _ in 0..100 {
            let name = generate_workspace_name();
            let suffix = name.strip_prefix(WORKSPACE_PREFIX).unwrap();
            assert_eq!(suffix.len(), 32);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_owner_annotation() {
        let ns = workspace_namespace("zombie-abc", "alice");
        assert!(is_workspace(&ns));
        assert_eq!(owner_of(&ns), Some("alice"));
        assert!(is_owned_by(&ns, "alice"));
        assert!(!is_owned_by(&ns, "bob"));
        assert!(!is_owned_by(&Namespace::default(), "alice"));
    }

    #[test]
    fn test_status_serializes_with_wire_names() {
        let status = WorkspaceStatus {
            name: "zombie-abc".into(),
            phase: Some("Active".into()),
            creation_timestamp: None,
            uid: Some("u-1".into()),
            resource_version: Some("7".into()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["namespace"], "zombie-abc");
        assert_eq!(json["status"], "Active");
        assert_eq!(json["resourceVersion"], "7");
        assert!(json.get("creationTime").is_some());
    }
}
