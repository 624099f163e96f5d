//! Image reference parsing.
//!
//! Parses image references like `ghcr.io/org/app:v1.0` into structured
//! components and normalizes Docker Hub shorthand (`redis` becomes
//! `docker.io/library/redis`).

use std::sync::OnceLock;

use imgrelay_core::error::{RelayError, Result};
use regex::Regex;

/// Default registry when none is specified.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Legacy Docker Hub host folded into `docker.io` when parsing.
const LEGACY_DEFAULT_REGISTRY: &str = "index.docker.io";

/// Namespace of Docker Hub official images.
pub const OFFICIAL_NAMESPACE: &str = "library";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

fn path_component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*$").expect("valid path regex")
    })
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))*(?::[0-9]+)?$",
        )
        .expect("valid domain regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid tag regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
            .expect("valid digest regex")
    })
}

/// Parsed image reference.
///
/// When the source text carries both a tag and a digest, the digest wins
/// and the tag is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, lowercased (e.g., "ghcr.io", "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path without host (e.g., "library/nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "v1.0"); `None` when absent or superseded by a digest
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `host:5000/image@sha256:abc...` → host:5000/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let text = reference.trim();
        if text.is_empty() {
            return Err(RelayError::malformed(reference, "empty image reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match text.split_once('@') {
            Some((name_tag, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(RelayError::malformed(
                        reference,
                        format!("invalid digest '{}'", digest),
                    ));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (text, None),
        };

        // Tag separator is the last colon after the last slash; a colon
        // before it belongs to a registry port.
        let last_slash = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                let tag = &name_tag[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(RelayError::malformed(
                        reference,
                        format!("invalid tag '{}'", tag),
                    ));
                }
                (&name_tag[..split], Some(tag.to_string()))
            }
            None => (name_tag, None),
        };

        let (registry, repository) = split_registry_repository(reference, name)?;

        // Digest is authoritative; the tag is dropped rather than retained.
        let tag = if digest.is_some() { None } else { tag };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Repository including the registry host (no tag or digest).
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Final repository path segment (e.g., "nginx" for "library/nginx").
    pub fn last_segment(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// `:tag`, `@digest`, or empty when neither is present.
    pub fn suffix(&self) -> String {
        if let Some(ref digest) = self.digest {
            format!("@{}", digest)
        } else if let Some(ref tag) = self.tag {
            format!(":{}", tag)
        } else {
            String::new()
        }
    }

    /// Tag or digest used to address the manifest, defaulting to `latest`.
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Whether the image lives on Docker Hub.
    pub fn is_docker_hub(&self) -> bool {
        is_docker_hub_host(&self.registry)
    }

    /// Canonical reference string: lowercased host, tag only when no digest.
    pub fn full_reference(&self) -> String {
        format!("{}{}", self.name(), self.suffix())
    }

    /// Convert to an oci-distribution reference, defaulting the tag.
    pub(crate) fn to_oci_reference(&self) -> Result<oci_distribution::Reference> {
        let text = match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}@{}", self.name(), digest),
            (None, Some(tag)) => format!("{}:{}", self.name(), tag),
            (None, None) => format!("{}:{}", self.name(), DEFAULT_TAG),
        };
        text.parse::<oci_distribution::Reference>()
            .map_err(|e| RelayError::malformed(text.clone(), e.to_string()))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `docker.io` or any `*.docker.io` subdomain.
pub fn is_docker_hub_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == DEFAULT_REGISTRY || host.ends_with(".docker.io")
}

/// Whether the first path component names a registry host rather than a
/// namespace.
pub fn looks_like_registry_host(component: &str) -> bool {
    component.contains('.')
        || component.contains(':')
        || component == "localhost"
        || component.chars().any(|c| c.is_ascii_uppercase())
}

/// Remove a trailing `@digest` or `:tag` from the last path segment only.
///
/// Does not validate the reference, so a malformed but displayable name
/// passes through. Registry ports in earlier segments are preserved.
pub fn strip_tag_and_digest(image: &str) -> String {
    let (prefix, last) = match image.rfind('/') {
        Some(i) => image.split_at(i + 1),
        None => ("", image),
    };
    let last = last.split('@').next().unwrap_or(last);
    let last = last.split(':').next().unwrap_or(last);
    format!("{}{}", prefix, last)
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest)) if looks_like_registry_host(first) => {
            if !domain_re().is_match(first) {
                return Err(RelayError::malformed(
                    reference,
                    format!("invalid registry host '{}'", first),
                ));
            }
            // Hosts are lowercased, so a bare uppercase component would
            // print back as a Docker Hub namespace.
            if !first.contains('.') && !first.contains(':') && first != "localhost" {
                return Err(RelayError::malformed(
                    reference,
                    format!("registry host '{}' needs a '.' or a port", first),
                ));
            }
            let host = first.to_ascii_lowercase();
            let host = if host == LEGACY_DEFAULT_REGISTRY {
                DEFAULT_REGISTRY.to_string()
            } else {
                host
            };
            (host, rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    if repository.is_empty() {
        return Err(RelayError::malformed(reference, "empty repository"));
    }
    for component in repository.split('/') {
        if !path_component_re().is_match(component) {
            return Err(RelayError::malformed(
                reference,
                format!("invalid repository component '{}'", component),
            ));
        }
    }

    // Single name like "nginx" → "library/nginx" for Docker Hub
    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("{}/{}", OFFICIAL_NAMESPACE, repository)
    } else {
        repository
    };

    Ok((registry, repository))
}
