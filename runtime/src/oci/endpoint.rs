//! Registry endpoint descriptors.

use super::credentials::RegistryCredentials;

/// Host Docker Hub credentials are keyed by.
pub const DOCKER_HUB_AUTH_HOST: &str = "index.docker.io";

/// A registry the engine reads from or writes to.
///
/// Describes one of: a replicated upstream registry, a proxy fronting it,
/// or an arbitrary private/destination registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Registry host (and optional port)
    pub endpoint: String,
    /// Proxy host that re-serves private upstream images
    pub proxy_endpoint: String,
    /// Custom-domain host aliased to `endpoint`
    pub upstream_endpoint: String,
    /// Path prefix under the host
    pub namespace: String,
    pub username: String,
    pub password: String,
}

impl RegistryOptions {
    /// Destination registry with an optional namespace.
    pub fn new(endpoint: &str, namespace: &str) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint),
            namespace: namespace.trim_matches('/').to_string(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_proxy(mut self, proxy_endpoint: &str, upstream_endpoint: &str) -> Self {
        self.proxy_endpoint = normalize_endpoint(proxy_endpoint);
        self.upstream_endpoint = normalize_endpoint(upstream_endpoint);
        self
    }

    /// `endpoint[/namespace]`
    pub fn base(&self) -> String {
        let endpoint = normalize_endpoint(&self.endpoint);
        if self.namespace.is_empty() {
            endpoint
        } else {
            format!("{}/{}", endpoint, self.namespace.trim_matches('/'))
        }
    }

    pub fn credentials(&self) -> RegistryCredentials {
        RegistryCredentials::from_parts(Some(&self.username), Some(&self.password))
    }
}

/// Strip scheme, a trailing `/v2[/]` or `/v1[/]`, and trailing slashes.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let mut e = endpoint.trim();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = e.strip_prefix(scheme) {
            e = rest;
        }
    }
    let e = e.trim_end_matches('/');
    let e = e
        .strip_suffix("/v2")
        .or_else(|| e.strip_suffix("/v1"))
        .unwrap_or(e);
    e.trim_end_matches('/').to_string()
}

/// Host credentials are keyed by. Docker Hub spellings (`docker.io`,
/// `registry-1.docker.io`) become `index.docker.io`.
///
/// Only for auth lookups; image names keep `docker.io`.
pub fn auth_host(host: &str) -> String {
    let host = normalize_endpoint(host).to_ascii_lowercase();
    match host.as_str() {
        "docker.io" | "registry-1.docker.io" => DOCKER_HUB_AUTH_HOST.to_string(),
        _ => host,
    }
}
