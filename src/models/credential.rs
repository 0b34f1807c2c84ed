use k8s_openapi::api::core::v1::Secret;

pub const ROLE_ANNOTATION: &str = "parity.io/role";
pub const USER_ROLE: &str = "user";
pub const TOKEN_KEY: &str = "token";

/// An owner's bearer credential, read from a secret in the service namespace.
///
/// The secret name is the owner identity.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerCredential {
    pub name: String,
    pub role: Option<String>,
    pub token: Option<String>,
}

impl OwnerCredential {
    /// Only `role == "user"` records with a token may authorize requests.
    pub fn is_eligible(&self) -> bool {
        self.role.as_deref() == Some(USER_ROLE) && self.token.is_some()
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.is_eligible() && self.token.as_deref() == Some(presented)
    }
}

impl From<&Secret> for OwnerCredential {
    fn from(secret: &Secret) -> Self {
        let role = secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ROLE_ANNOTATION))
            .cloned();
        // Non-UTF-8 token bytes can never equal a header value.
        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get(TOKEN_KEY))
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok());
        Self {
            name: secret.metadata.name.clone().unwrap_or_default(),
            role,
            token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(name: &str, role: Option<&str>, token: Option<&[u8]>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                annotations: role.map(|r| {
                    BTreeMap::from([(ROLE_ANNOTATION.to_string(), r.to_string())])
                }),
                ..Default::default()
            },
            data: token.map(|t| BTreeMap::from([(TOKEN_KEY.to_string(), ByteString(t.to_vec()))])),
            ..Default::default()
        }
    }

    #[test]
    fn test_eligibility() {
        let user = OwnerCredential::from(&secret("alice", Some("user"), Some(b"T1".as_slice())));
        assert!(user.is_eligible());
        assert!(user.matches("T1"));
        assert!(!user.matches("T2"));

        let admin = OwnerCredential::from(&secret("ops", Some("admin"), Some(b"T1".as_slice())));
        assert!(!admin.matches("T1"));

        let tokenless = OwnerCredential::from(&secret("bob", Some("user"), None));
        assert!(!tokenless.is_eligible());

        let binary = OwnerCredential::from(&secret("carol", Some("user"), Some([0xffu8, 0xfe].as_slice())));
        assert!(binary.token.is_none());
    }
}
