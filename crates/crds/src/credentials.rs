//! BMC credential references
//!
//! Tracks which credentials Secret (and which revision of it) was last tried
//! against, or last verified with, the host's BMC.

use k8s_openapi::api::core::v1::Secret;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a Secret by name and namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret
    pub name: String,

    /// Namespace of the Secret (defaults to the host's namespace)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// A credentials Secret pinned to a resource version
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsStatus {
    /// Secret holding the BMC username and password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretReference>,

    /// Secret resource version the credentials were read from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials_version: String,
}

impl CredentialsStatus {
    /// Build a credentials status pointing at the given Secret revision
    pub fn from_secret(secret: &Secret) -> Self {
        Self {
            credentials: Some(SecretReference {
                name: secret.metadata.name.clone().unwrap_or_default(),
                namespace: secret.metadata.namespace.clone().unwrap_or_default(),
            }),
            credentials_version: secret.metadata.resource_version.clone().unwrap_or_default(),
        }
    }

    /// Whether this status refers to exactly the given Secret revision
    ///
    /// An empty status never matches, so a host that has never been
    /// verified always reports its credentials as changed.
    pub fn matches(&self, secret: &Secret) -> bool {
        let Some(reference) = &self.credentials else {
            return false;
        };

        reference.name == secret.metadata.name.as_deref().unwrap_or_default()
            && reference.namespace == secret.metadata.namespace.as_deref().unwrap_or_default()
            && self.credentials_version
                == secret.metadata.resource_version.as_deref().unwrap_or_default()
    }
}
