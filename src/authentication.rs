//! Request authentication.
//!
//! A view tries its [`Authenticator`]s in order; the first that yields a
//! [`Principal`] wins. When some are configured and none succeed the request
//! is rejected with 401 and every authenticator's challenge.

use crate::error::AppError;
use crate::request::ApiRequest;
use async_trait::async_trait;
use axum::http::header;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value as Json};

/// The authenticated caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Principal {
    pub id: String,
    pub claims: Map<String, Json>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            claims: Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn claim(&self, key: &str) -> Option<&Json> {
        self.claims.get(key)
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` when this scheme does not apply to the request.
    async fn authenticate(&self, req: &ApiRequest) -> Result<Option<Principal>, AppError>;

    /// Scheme name sent in `WWW-Authenticate`.
    fn challenge(&self) -> String;
}

/// Checks a username and password.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<Option<Principal>, AppError>;
}

#[async_trait]
impl<F> CredentialVerifier for F
where
    F: Fn(&str, &str) -> Option<Principal> + Send + Sync,
{
    async fn verify(&self, username: &str, password: &str) -> Result<Option<Principal>, AppError> {
        Ok(self(username, password))
    }
}

/// HTTP Basic authentication.
pub struct BasicAuthentication<V> {
    verifier: V,
}

impl<V: CredentialVerifier> BasicAuthentication<V> {
    pub fn new(verifier: V) -> Self {
        BasicAuthentication { verifier }
    }
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized {
        description: "Invalid credentials".into(),
        challenges: vec!["Basic".into()],
    }
}

/// `user:password` from a Basic credentials token.
fn decode_credentials(token: &str) -> Option<(String, String)> {
    let bytes = STANDARD.decode(token).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (user, password) = text.split_once(':').unwrap_or((text.as_str(), ""));
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl<V: CredentialVerifier> Authenticator for BasicAuthentication<V> {
    async fn authenticate(&self, req: &ApiRequest) -> Result<Option<Principal>, AppError> {
        let Some(value) = req.header(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let parts: Vec<&str> = value.split_whitespace().collect();
        let [scheme, token] = parts.as_slice() else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return Ok(None);
        }
        let (user, password) = decode_credentials(token).ok_or_else(invalid_credentials)?;
        match self.verifier.verify(&user, &password).await? {
            Some(principal) => {
                tracing::debug!(user = %principal.id, "basic authentication succeeded");
                Ok(Some(principal))
            }
            None => Err(invalid_credentials()),
        }
    }

    fn challenge(&self) -> String {
        "Basic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};

    fn auth() -> BasicAuthentication<impl CredentialVerifier> {
        BasicAuthentication::new(|user: &str, password: &str| {
            (user == "admin" && password == "pw").then(|| Principal::new("admin"))
        })
    }

    fn request(header_value: &str) -> ApiRequest {
        ApiRequest::new(Method::GET).with_header(header::AUTHORIZATION, header_value)
    }

    #[tokio::test]
    async fn accepts_valid_credentials() {
        let token = STANDARD.encode("admin:pw");
        let principal = auth().authenticate(&request(&format!("Basic {}", token))).await.unwrap();
        assert_eq!(principal, Some(Principal::new("admin")));
    }

    #[tokio::test]
    async fn rejects_bad_credentials_with_challenge() {
        let token = STANDARD.encode("admin:nope");
        let err = auth().authenticate(&request(&format!("Basic {}", token))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert!(matches!(err, AppError::Unauthorized { challenges, .. } if challenges == vec!["Basic"]));
    }

    #[tokio::test]
    async fn ignores_missing_or_foreign_headers() {
        assert_eq!(auth().authenticate(&ApiRequest::new(Method::GET)).await.unwrap(), None);
        assert_eq!(auth().authenticate(&request("Bearer abc")).await.unwrap(), None);
    }

    #[test]
    fn challenge_is_scheme_name() {
        assert_eq!(auth().challenge(), "Basic");
    }
}
