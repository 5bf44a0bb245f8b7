//! GitHub Actions repository secrets.
//!
//! Values never leave this process in the clear: each one is sealed to the
//! repository's current public key before the PUT.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, KEY_SIZE};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::orchestrator::{ActionInvoker, InvocationError, InvokeResult, Target};
use crate::paths;

use super::github::GitHubClient;
use super::{json_body, parse_payload, transport_error};

pub const UPLOAD_SECRET: &str = "upload-secret";

/// Per-target payload for `upload-secret`. The target id is the repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretUpload {
    pub name: String,
    pub value: String,
}

/// The key GitHub wants secrets for one repository sealed to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoPublicKey {
    pub key_id: String,
    /// Base64 of the 32-byte Curve25519 key.
    pub key: String,
}

impl GitHubClient {
    pub fn secrets_public_key(&self, repo: &str) -> Result<RepoPublicKey, InvocationError> {
        let path = format!("/repos/{}/{}/actions/secrets/public-key", self.owner(), repo);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .map_err(transport_error)?;
        let body = json_body(response)?;
        serde_json::from_value(body)
            .map_err(|e| InvocationError::rejected(format!("unexpected public key response: {e}")))
    }

    /// Create or replace secret `name` in `repo`.
    pub fn put_secret(&self, repo: &str, name: &str, value: &str) -> InvokeResult {
        let public_key = self.secrets_public_key(repo)?;
        let encrypted_value = seal_secret(&public_key.key, value)?;

        let path = format!("/repos/{}/{}/actions/secrets/{}", self.owner(), repo, name);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&json!({
                "encrypted_value": encrypted_value,
                "key_id": public_key.key_id,
            }))
            .send()
            .map_err(transport_error)?;
        json_body(response)?;
        Ok(json!({ "name": name, "key_id": public_key.key_id }))
    }
}

/// Seal `value` to a base64 Curve25519 public key and base64 the result.
pub fn seal_secret(public_key_b64: &str, value: &str) -> Result<String, InvocationError> {
    let raw = STANDARD
        .decode(public_key_b64.trim())
        .map_err(|e| InvocationError::rejected(format!("repository public key is not base64: {e}")))?;
    let bytes: [u8; KEY_SIZE] = raw.as_slice().try_into().map_err(|_| {
        InvocationError::rejected(format!(
            "repository public key is {} bytes, expected {KEY_SIZE}",
            raw.len()
        ))
    })?;
    let sealed = PublicKey::from(bytes)
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|e| InvocationError::rejected(format!("failed to seal secret: {e}")))?;
    Ok(STANDARD.encode(sealed))
}

// ---------------------------------------------------------------------------
// Invoker
// ---------------------------------------------------------------------------

/// Sets one Actions secret in the repository named by the target id.
pub struct UploadSecret {
    client: Arc<GitHubClient>,
}

impl UploadSecret {
    pub fn new(client: Arc<GitHubClient>) -> Self {
        Self { client }
    }
}

impl ActionInvoker for UploadSecret {
    fn action(&self) -> &str {
        UPLOAD_SECRET
    }

    fn invoke(&self, target: &Target) -> InvokeResult {
        let upload: SecretUpload = parse_payload(&target.payload)?;
        paths::validate_secret_name(&upload.name)
            .map_err(|e| InvocationError::rejected(e.to_string()))?;
        if upload.value.is_empty() {
            return Err(InvocationError::rejected(format!(
                "secret {} has an empty value",
                upload.name
            )));
        }
        self.client.put_secret(&target.id, &upload.name, &upload.value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::InvocationErrorKind;
    use crypto_box::SecretKey;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(server: &mockito::Server) -> Arc<GitHubClient> {
        Arc::new(
            GitHubClient::new(server.url(), "octo", false, "ghp_testtoken", Duration::from_secs(5))
                .unwrap(),
        )
    }

    fn repo_key() -> (SecretKey, String) {
        let secret = SecretKey::generate(&mut OsRng);
        let public = STANDARD.encode(secret.public_key().as_bytes());
        (secret, public)
    }

    #[test]
    fn sealed_value_opens_with_the_repository_key() {
        let (secret, public) = repo_key();
        let sealed = seal_secret(&public, "tskey-auth-abc").unwrap();
        let opened = secret.unseal(&STANDARD.decode(sealed).unwrap()).unwrap();
        assert_eq!(opened, b"tskey-auth-abc");
    }

    #[test]
    fn malformed_public_keys_are_rejected() {
        let err = seal_secret("not base64!", "v").unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Rejected);

        let err = seal_secret(&STANDARD.encode([1u8; 16]), "v").unwrap_err();
        assert!(err.message.contains("16 bytes"), "{err}");
    }

    #[test]
    fn upload_fetches_key_then_puts_sealed_value() {
        let (_secret, public) = repo_key();
        let mut server = mockito::Server::new();
        let key = server
            .mock("GET", "/repos/octo/repo-a/actions/secrets/public-key")
            .match_header("authorization", "Bearer ghp_testtoken")
            .with_status(200)
            .with_body(json!({"key_id": "568250167242549743", "key": public}).to_string())
            .create();
        let put = server
            .mock("PUT", "/repos/octo/repo-a/actions/secrets/TS_AUTHKEY")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({"key_id": "568250167242549743"})),
                Matcher::Regex(r#""encrypted_value":"[A-Za-z0-9+/]+=*""#.to_string()),
            ]))
            .with_status(201)
            .create();

        let target = Target::new("repo-a", json!({"name": "TS_AUTHKEY", "value": "tskey-auth-abc"}));
        let result = UploadSecret::new(client(&server)).invoke(&target).unwrap();

        key.assert();
        put.assert();
        assert_eq!(result, json!({"name": "TS_AUTHKEY", "key_id": "568250167242549743"}));
    }

    #[test]
    fn invalid_name_is_rejected_without_a_request() {
        let mut server = mockito::Server::new();
        let any = server.mock("GET", Matcher::Any).expect(0).create();

        let target = Target::new("repo-a", json!({"name": "ts-authkey", "value": "v"}));
        let err = UploadSecret::new(client(&server)).invoke(&target).unwrap_err();

        assert_eq!(err.kind, InvocationErrorKind::Rejected);
        assert!(err.message.contains("ts-authkey"));
        any.assert();
    }

    #[test]
    fn missing_repository_is_a_rejection() {
        let mut server = mockito::Server::new();
        let _key = server
            .mock("GET", "/repos/octo/gone/actions/secrets/public-key")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create();
        let put = server.mock("PUT", Matcher::Any).expect(0).create();

        let target = Target::new("gone", json!({"name": "TOKEN", "value": "v"}));
        let err = UploadSecret::new(client(&server)).invoke(&target).unwrap_err();

        assert_eq!(err.kind, InvocationErrorKind::Rejected);
        assert!(err.message.contains("Not Found"));
        put.assert();
        assert!(UploadSecret::new(client(&server)).idempotent());
    }
}
