//! Remote storage credential resolution from Kubernetes Secrets

use std::fmt;

use k8s_openapi::api::core::v1::Secret;

use splunk_common::{CredentialError, Error, ObjectStore, Result, S3_ACCESS_KEY, S3_SECRET_KEY};

/// Keys read from a credential secret
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    /// Access key
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
    /// resourceVersion of the secret the keys came from
    pub resource_version: Option<String>,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("resource_version", &self.resource_version)
            .finish()
    }
}

fn key_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| std::str::from_utf8(&v.0).ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Extract the access and secret keys from a secret
pub fn keys_from_secret(secret: &Secret) -> std::result::Result<(String, String), CredentialError> {
    if secret.data.as_ref().map_or(true, |d| d.is_empty()) {
        return Err(CredentialError::EmptySecret);
    }
    match (key_value(secret, S3_ACCESS_KEY), key_value(secret, S3_SECRET_KEY)) {
        (Some(access), Some(secret_key)) => Ok((access, secret_key)),
        (Some(_), None) => Err(CredentialError::MissingSecretKey),
        (None, _) => Err(CredentialError::MissingAccessKey),
    }
}

/// Read remote storage keys from the named secret
///
/// Every failure is an `Error::Credentials`, which callers treat as a
/// configuration error; no client is ever built from partial keys.
pub async fn resolve_credentials<S: ObjectStore>(
    store: &S,
    namespace: &str,
    secret_name: &str,
) -> Result<RemoteCredentials> {
    let secret: Secret = store
        .get(namespace, secret_name)
        .await?
        .ok_or_else(|| Error::credentials(secret_name, CredentialError::SecretNotFound))?;
    let (access_key, secret_key) =
        keys_from_secret(&secret).map_err(|cause| Error::credentials(secret_name, cause))?;
    Ok(RemoteCredentials {
        access_key,
        secret_key,
        resource_version: secret.metadata.resource_version,
    })
}
