//! Amazon ECR support.
//!
//! ECR hosts look like `<registryId>.dkr.ecr.<region>.amazonaws.com`. The
//! configured username/password is an AWS access key pair; it is exchanged
//! through `GetAuthorizationToken` for a short-lived `AWS:<password>` pair.

use async_trait::async_trait;
use aws_config::Region;
use base64::Engine;
use imgrelay_core::error::{RelayError, Result};

use super::credentials::RegistryCredentials;
use super::endpoint::normalize_endpoint;

/// Username that marks credentials as already exchanged.
pub const ECR_TOKEN_USERNAME: &str = "AWS";

/// Parsed ECR registry host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrEndpoint {
    pub registry_id: String,
    pub region: String,
}

impl EcrEndpoint {
    /// Parse `<registryId>.dkr.ecr.<region>.amazonaws.com`.
    pub fn parse(host: &str) -> Result<Self> {
        let host = normalize_endpoint(host);
        let host = host.split('/').next().unwrap_or(&host);
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() < 6
            || parts[1] != "dkr"
            || parts[2] != "ecr"
            || !host.ends_with(".amazonaws.com")
            || parts[0].is_empty()
            || parts[3].is_empty()
        {
            return Err(RelayError::Ecr(format!(
                "'{}' is not an ECR registry host",
                host
            )));
        }
        Ok(Self {
            registry_id: parts[0].to_string(),
            region: parts[3].to_string(),
        })
    }
}

/// Whether a host is served by ECR.
pub fn is_ecr_host(host: &str) -> bool {
    let host = normalize_endpoint(host);
    host.split('/')
        .next()
        .map(|h| h.ends_with(".amazonaws.com"))
        .unwrap_or(false)
}

/// Source of ECR authorization tokens.
#[async_trait]
pub trait EcrTokenSource: Send + Sync {
    /// Return the raw base64 `user:password` authorization token.
    async fn authorization_token(
        &self,
        endpoint: &EcrEndpoint,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<String>;
}

/// Token source backed by the AWS SDK.
pub struct AwsEcrTokenSource;

#[async_trait]
impl EcrTokenSource for AwsEcrTokenSource {
    async fn authorization_token(
        &self,
        endpoint: &EcrEndpoint,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<String> {
        let credentials = aws_sdk_ecr::config::Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "imgrelay",
        );
        let config = aws_config::from_env()
            .region(Region::new(endpoint.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        let client = aws_sdk_ecr::Client::new(&config);

        let output = client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| RelayError::Ecr(format!("GetAuthorizationToken failed: {}", e)))?;

        output
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .map(|token| token.to_string())
            .ok_or_else(|| {
                RelayError::Ecr(format!(
                    "No authorization data returned for registry {}",
                    endpoint.registry_id
                ))
            })
    }
}

/// Decode a base64 `user:password` token.
pub fn decode_ecr_token(token: &str) -> Result<RegistryCredentials> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| RelayError::Ecr(format!("Failed to decode authorization token: {}", e)))?;
    let text = String::from_utf8(decoded)
        .map_err(|e| RelayError::Ecr(format!("Authorization token is not UTF-8: {}", e)))?;
    let (username, password) = text
        .split_once(':')
        .ok_or_else(|| RelayError::Ecr("Authorization token has no ':' separator".to_string()))?;
    Ok(RegistryCredentials::basic(username, password))
}

/// Exchange access-key credentials for ECR credentials when `host` is ECR
/// and the username is not already `AWS`. Otherwise returns them unchanged.
pub async fn resolve_ecr_credentials(
    host: &str,
    credentials: &RegistryCredentials,
    source: &dyn EcrTokenSource,
) -> Result<RegistryCredentials> {
    if !is_ecr_host(host) {
        return Ok(credentials.clone());
    }
    let (Some(username), Some(password)) = (&credentials.username, &credentials.password) else {
        return Ok(credentials.clone());
    };
    if username == ECR_TOKEN_USERNAME {
        return Ok(credentials.clone());
    }

    let endpoint = EcrEndpoint::parse(host)?;
    tracing::debug!(
        registry_id = %endpoint.registry_id,
        region = %endpoint.region,
        "Exchanging access key for ECR token"
    );
    let token = source
        .authorization_token(&endpoint, username, password)
        .await?;
    decode_ecr_token(&token)
}
