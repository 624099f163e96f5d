//! Registry access checks.
//!
//! Implements the Docker registry challenge flow:
//! 1. `GET /v2/` answers 200 (anonymous access) or 401 with `WWW-Authenticate`
//! 2. A `basic` challenge cannot be verified further without a push
//! 3. A `bearer` challenge names a `realm` (and optional `service`)
//! 4. The realm is fetched with Basic credentials; anything but 200 is a
//!    rejected login

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use imgrelay_core::error::{RelayError, Result};
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use serde::Deserialize;

use super::credentials::RegistryCredentials;
use super::ecr::{resolve_ecr_credentials, AwsEcrTokenSource, EcrTokenSource};
use super::endpoint::normalize_endpoint;

/// One challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme ("bearer", "basic", ...)
    pub scheme: String,
    pub params: HashMap<String, String>,
}

impl Challenge {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}

/// Structured error body returned by registries.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Checks whether credentials grant access to a registry.
pub struct RegistryAuthClient {
    http: reqwest::Client,
    ecr: Arc<dyn EcrTokenSource>,
}

impl RegistryAuthClient {
    /// Create a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_ecr_source(timeout, Arc::new(AwsEcrTokenSource))
    }

    pub fn with_ecr_source(timeout: Duration, ecr: Arc<dyn EcrTokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, ecr })
    }

    /// Verify that `username`/`password` can log in to `endpoint`.
    pub async fn check_access(&self, endpoint: &str, username: &str, password: &str) -> Result<()> {
        let host = normalize_endpoint(endpoint);
        let response = self.ping(&host).await?;

        match response.status() {
            StatusCode::OK => {
                tracing::debug!(registry = %host, "Registry allows anonymous access");
                return Ok(());
            }
            StatusCode::UNAUTHORIZED => {}
            status => {
                return Err(RelayError::Registry {
                    registry: host,
                    message: format!("unexpected status {} from /v2/", status),
                });
            }
        }

        let challenges: Vec<Challenge> = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_www_authenticate)
            .collect();

        if challenges.iter().any(|c| c.scheme == "basic") {
            // Cannot verify basic auth without attempting a push.
            tracing::debug!(registry = %host, "Registry uses basic auth");
            return Ok(());
        }

        let bearer = challenges
            .iter()
            .find(|c| c.scheme == "bearer")
            .ok_or_else(|| RelayError::AuthChallengeUnsupported {
                registry: host.clone(),
                challenge: challenges
                    .iter()
                    .map(|c| c.scheme.clone())
                    .collect::<Vec<_>>()
                    .join(","),
            })?;

        let realm = bearer.param("realm").ok_or_else(|| RelayError::AuthenticationFailed {
            registry: host.clone(),
            message: "bearer challenge has no realm".to_string(),
        })?;

        let credentials = resolve_ecr_credentials(
            &host,
            &RegistryCredentials::basic(username, password),
            self.ecr.as_ref(),
        )
        .await?;

        self.fetch_token(&host, realm, bearer.param("service"), &credentials)
            .await
    }

    /// `GET https://<host>/v2/`, falling back to plain HTTP when the TLS
    /// request cannot be sent.
    async fn ping(&self, host: &str) -> Result<reqwest::Response> {
        let https = format!("https://{}/v2/", host);
        match self.http.get(&https).send().await {
            Ok(resp) => Ok(resp),
            Err(tls_err) => {
                tracing::debug!(registry = %host, error = %tls_err, "HTTPS ping failed, trying HTTP");
                let http = format!("http://{}/v2/", host);
                self.http.get(&http).send().await.map_err(|e| {
                    RelayError::RegistryUnreachable {
                        registry: host.to_string(),
                        message: format!("{} (https: {})", e, tls_err),
                    }
                })
            }
        }
    }

    async fn fetch_token(
        &self,
        host: &str,
        realm: &str,
        service: Option<&str>,
        credentials: &RegistryCredentials,
    ) -> Result<()> {
        let mut request = self.http.get(realm);
        if let Some(service) = service {
            request = request.query(&[("service", service)]);
        }
        if let (Some(u), Some(p)) = (&credentials.username, &credentials.password) {
            request = request.basic_auth(u, Some(p));
        }

        let response = request.send().await.map_err(|e| RelayError::RegistryUnreachable {
            registry: host.to_string(),
            message: format!("token request to {} failed: {}", realm, e),
        })?;

        let status = response.status();
        if status == StatusCode::OK {
            tracing::debug!(registry = %host, "Bearer token issued");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(RelayError::AuthenticationFailed {
            registry: host.to_string(),
            message: describe_error_body(status, &body),
        })
    }
}

/// Render a registry error body, preferring its structured `errors` list.
fn describe_error_body(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let details: Vec<String> = parsed
            .errors
            .iter()
            .map(|e| match (e.code.is_empty(), e.message.is_empty()) {
                (false, false) => format!("{}: {}", e.code, e.message),
                (false, true) => e.code.clone(),
                _ => e.message.clone(),
            })
            .filter(|s| !s.is_empty())
            .collect();
        if !details.is_empty() {
            return format!("{} ({})", details.join("; "), status);
        }
    }
    format!("token request returned {}", status)
}

/// Parse a `WWW-Authenticate` header into its challenges.
///
/// Handles several challenges in one header value and quoted parameter
/// values containing commas.
pub fn parse_www_authenticate(header: &str) -> Vec<Challenge> {
    let mut challenges: Vec<Challenge> = Vec::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        // Scheme token
        let scheme_end = rest
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(rest.len());
        let scheme = rest[..scheme_end].to_ascii_lowercase();
        rest = rest[scheme_end..].trim_start_matches(|c: char| c.is_whitespace() || c == ',');

        let mut params = HashMap::new();
        loop {
            let Some(eq) = rest.find('=') else { break };
            let key = &rest[..eq];
            // A bare token followed by whitespace starts the next challenge.
            if key.contains(char::is_whitespace) || key.is_empty() {
                break;
            }
            let after = &rest[eq + 1..];
            let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
                match quoted.find('"') {
                    Some(end) => (&quoted[..end], &quoted[end + 1..]),
                    None => (quoted, ""),
                }
            } else {
                let end = after.find(',').unwrap_or(after.len());
                (after[..end].trim(), &after[end..])
            };
            params.insert(key.trim().to_ascii_lowercase(), value.to_string());
            rest = remaining.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        }

        if !scheme.is_empty() {
            challenges.push(Challenge { scheme, params });
        }
    }

    challenges
}
