//! Image rewriting for kustomize-style substitution.
//!
//! Computes where an image lands in a destination registry and every
//! textual spelling under which a manifest may reference the source.

use imgrelay_core::error::{RelayError, Result};
use serde::{Deserialize, Serialize};

use super::endpoint::{normalize_endpoint, RegistryOptions};
use super::reference::{
    is_docker_hub_host, looks_like_registry_host, strip_tag_and_digest, ImageReference,
    DEFAULT_REGISTRY, DEFAULT_TAG, OFFICIAL_NAMESPACE,
};

/// One kustomize `images:` entry.
///
/// `new_tag` and `digest` are never both set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewrittenImage {
    /// Source name as written, without tag or digest
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub new_tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl RewrittenImage {
    /// Same destination under a different source spelling.
    fn with_name(&self, name: String) -> Self {
        Self {
            name,
            ..self.clone()
        }
    }

    /// Destination reference, `newName:newTag` or `newName@digest`.
    pub fn destination(&self) -> String {
        if !self.digest.is_empty() {
            format!("{}@{}", self.new_name, self.digest)
        } else {
            format!("{}:{}", self.new_name, self.new_tag)
        }
    }
}

/// Rewrite `src_image` to live under `dest`.
///
/// `newName` is `dest.endpoint[/namespace]/<last path segment>`. A digest
/// takes priority over a tag; with neither the tag is `latest`.
pub fn rewrite(src_image: &str, dest: &RegistryOptions) -> Result<RewrittenImage> {
    let reference = ImageReference::parse(src_image)?;

    let (new_tag, digest) = match (&reference.digest, &reference.tag) {
        (Some(digest), _) => (String::new(), digest.clone()),
        (None, Some(tag)) => (tag.clone(), String::new()),
        (None, None) => (DEFAULT_TAG.to_string(), String::new()),
    };

    Ok(RewrittenImage {
        name: strip_tag_and_digest(src_image.trim()),
        new_name: format!("{}/{}", dest.base(), reference.last_segment()),
        new_tag,
        digest,
    })
}

/// The input followed by every Docker Hub spelling of the same image.
///
/// Images on other registries yield only the input.
pub fn build_alt_names(image: &RewrittenImage) -> Vec<RewrittenImage> {
    let mut names = vec![image.name.clone()];
    for alt in alternate_names(&image.name) {
        if !names.contains(&alt) {
            names.push(alt);
        }
    }
    names.into_iter().map(|n| image.with_name(n)).collect()
}

fn alternate_names(name: &str) -> Vec<String> {
    let hub = DEFAULT_REGISTRY;
    let lib = OFFICIAL_NAMESPACE;
    let parts: Vec<&str> = name.split('/').collect();
    let first = parts[0];

    if parts.len() == 1 {
        return vec![
            format!("{hub}/{lib}/{name}"),
            format!("{lib}/{name}"),
            format!("{hub}/{name}"),
        ];
    }

    if is_docker_hub_host(first) {
        let rest = parts[1..].join("/");
        let mut alts = if parts.len() == 2 {
            vec![
                rest.clone(),
                format!("{hub}/{lib}/{rest}"),
                format!("{lib}/{rest}"),
            ]
        } else if parts[1] == lib {
            let image = parts[2..].join("/");
            vec![
                format!("{lib}/{image}"),
                image.clone(),
                format!("{hub}/{image}"),
            ]
        } else {
            vec![rest.clone()]
        };
        // Subdomains like registry-1.docker.io also get the plain host.
        if first != hub {
            alts.push(format!("{hub}/{rest}"));
        }
        return alts;
    }

    if first == lib {
        let image = parts[1..].join("/");
        return vec![
            image.clone(),
            format!("{hub}/{image}"),
            format!("{hub}/{lib}/{image}"),
        ];
    }

    if looks_like_registry_host(first) {
        return Vec::new();
    }

    vec![format!("{hub}/{name}")]
}

/// Route a private image through the proxy registry.
///
/// - host is `src.endpoint`: returned unchanged
/// - host is `src.upstream_endpoint`: host swapped for `src.endpoint`
/// - otherwise: `<proxy>/proxy/<app_slug>/<name>` plus the tag or digest
pub fn rewrite_private_image(
    src: &RegistryOptions,
    image: &str,
    app_slug: &str,
) -> Result<String> {
    let image = image.trim();
    let reference = ImageReference::parse(image)?;
    let host = reference.registry.as_str();
    let endpoint = normalize_endpoint(&src.endpoint).to_ascii_lowercase();

    if host == endpoint {
        return Ok(image.to_string());
    }

    // A digest replaces the tag.
    let name = strip_tag_and_digest(image);
    let suffix = reference.suffix();

    let upstream = normalize_endpoint(&src.upstream_endpoint).to_ascii_lowercase();
    if !upstream.is_empty() && host == upstream {
        // The host is the first segment as written; keep the path after it.
        let path = name.find('/').map(|i| &name[i..]).unwrap_or("");
        return Ok(format!("{}{}{}", normalize_endpoint(&src.endpoint), path, suffix));
    }

    let proxy = normalize_endpoint(&src.proxy_endpoint);
    if proxy.is_empty() {
        return Err(RelayError::Config(format!(
            "no proxy endpoint configured to route private image {}",
            image
        )));
    }
    Ok(format!("{}/proxy/{}/{}{}", proxy, app_slug, name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c4c";

    fn dest() -> RegistryOptions {
        RegistryOptions::new("registry.example.com", "team")
    }

    fn names(images: &[RewrittenImage]) -> Vec<&str> {
        images.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_rewrite_tag() {
        let r = rewrite("quay.io/org/app:1.2", &dest()).unwrap();
        assert_eq!(r.name, "quay.io/org/app");
        assert_eq!(r.new_name, "registry.example.com/team/app");
        assert_eq!(r.new_tag, "1.2");
        assert_eq!(r.digest, "");
    }

    #[test]
    fn test_rewrite_digest_wins() {
        let r = rewrite(&format!("nginx:1.25@{}", DIGEST), &dest()).unwrap();
        assert_eq!(r.name, "nginx");
        assert_eq!(r.new_tag, "");
        assert_eq!(r.digest, DIGEST);
        assert_eq!(r.destination(), format!("registry.example.com/team/nginx@{}", DIGEST));
    }

    #[test]
    fn test_rewrite_defaults_latest() {
        let r = rewrite("redis", &RegistryOptions::new("r.io", "")).unwrap();
        assert_eq!(r.new_name, "r.io/redis");
        assert_eq!(r.new_tag, "latest");
        assert_eq!(r.destination(), "r.io/redis:latest");
    }

    #[test]
    fn test_rewrite_ported_host() {
        let r = rewrite("localhost:5000/ns/app:v1", &dest()).unwrap();
        assert_eq!(r.name, "localhost:5000/ns/app");
        assert_eq!(r.new_name, "registry.example.com/team/app");
    }

    #[test]
    fn test_rewrite_malformed() {
        assert!(matches!(
            rewrite("bad image", &dest()),
            Err(RelayError::MalformedReference { .. })
        ));
    }

    #[test]
    fn test_tag_and_digest_exclusive() {
        for image in ["redis", "redis:7", &format!("redis@{}", DIGEST), &format!("a/b:c@{}", DIGEST)] {
            let r = rewrite(image, &dest()).unwrap();
            assert!(r.new_tag.is_empty() ^ r.digest.is_empty(), "{image}");
        }
    }

    #[test]
    fn test_alt_names_single_segment() {
        let alts = build_alt_names(&rewrite("redis", &dest()).unwrap());
        assert_eq!(
            names(&alts),
            vec!["redis", "docker.io/library/redis", "library/redis", "docker.io/redis"]
        );
        for alt in &alts {
            assert_eq!(alt.new_name, "registry.example.com/team/redis");
            assert_eq!(alt.new_tag, "latest");
            assert_eq!(alt.digest, "");
        }
    }

    #[test]
    fn test_alt_names_namespace() {
        let alts = build_alt_names(&rewrite("bitnami/redis:7", &dest()).unwrap());
        assert_eq!(names(&alts), vec!["bitnami/redis", "docker.io/bitnami/redis"]);
    }

    #[test]
    fn test_alt_names_docker_io_library() {
        let alts = build_alt_names(&rewrite("docker.io/library/redis", &dest()).unwrap());
        assert_eq!(
            names(&alts),
            vec!["docker.io/library/redis", "library/redis", "redis", "docker.io/redis"]
        );
    }

    #[test]
    fn test_alt_names_docker_io_short() {
        let alts = build_alt_names(&rewrite("docker.io/redis", &dest()).unwrap());
        assert_eq!(
            names(&alts),
            vec!["docker.io/redis", "redis", "docker.io/library/redis", "library/redis"]
        );
    }

    #[test]
    fn test_alt_names_docker_io_namespace() {
        let alts = build_alt_names(&rewrite("docker.io/bitnami/redis", &dest()).unwrap());
        assert_eq!(names(&alts), vec!["docker.io/bitnami/redis", "bitnami/redis"]);
    }

    #[test]
    fn test_alt_names_library_prefix() {
        let alts = build_alt_names(&rewrite("library/redis:7", &dest()).unwrap());
        assert_eq!(
            names(&alts),
            vec!["library/redis", "redis", "docker.io/redis", "docker.io/library/redis"]
        );
    }

    #[test]
    fn test_alt_names_docker_hub_subdomain() {
        let alts = build_alt_names(&rewrite("registry-1.docker.io/bitnami/redis", &dest()).unwrap());
        assert_eq!(
            names(&alts),
            vec!["registry-1.docker.io/bitnami/redis", "bitnami/redis", "docker.io/bitnami/redis"]
        );
    }

    #[test]
    fn test_alt_names_other_registry() {
        let input = rewrite("quay.io/org/img:tag", &dest()).unwrap();
        let alts = build_alt_names(&input);
        assert_eq!(alts, vec![input]);
    }

    #[test]
    fn test_alt_names_carry_digest() {
        let alts = build_alt_names(&rewrite(&format!("redis@{}", DIGEST), &dest()).unwrap());
        assert_eq!(alts.len(), 4);
        assert!(alts.iter().all(|a| a.digest == DIGEST && a.new_tag.is_empty()));
    }

    fn src_registry() -> RegistryOptions {
        RegistryOptions {
            endpoint: "registry.vendor.com".into(),
            proxy_endpoint: "proxy.vendor.com".into(),
            upstream_endpoint: "images.customer.io".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_private_image_on_endpoint_unchanged() {
        let image = "registry.vendor.com/app/api:1.0";
        assert_eq!(rewrite_private_image(&src_registry(), image, "myapp").unwrap(), image);
    }

    #[test]
    fn test_private_image_upstream_swapped() {
        let image = format!("images.customer.io/app/api@{}", DIGEST);
        assert_eq!(
            rewrite_private_image(&src_registry(), &image, "myapp").unwrap(),
            format!("registry.vendor.com/app/api@{}", DIGEST)
        );
    }

    #[test]
    fn test_private_image_proxied() {
        assert_eq!(
            rewrite_private_image(&src_registry(), "quay.io/org/api:2.0", "myapp").unwrap(),
            "proxy.vendor.com/proxy/myapp/quay.io/org/api:2.0"
        );
        assert_eq!(
            rewrite_private_image(&src_registry(), &format!("api@{}", DIGEST), "myapp").unwrap(),
            format!("proxy.vendor.com/proxy/myapp/api@{}", DIGEST)
        );
    }

    #[test]
    fn test_private_image_tag_dropped_for_digest() {
        assert_eq!(
            rewrite_private_image(&src_registry(), &format!("quay.io/org/api:2.0@{}", DIGEST), "myapp")
                .unwrap(),
            format!("proxy.vendor.com/proxy/myapp/quay.io/org/api@{}", DIGEST)
        );
        assert_eq!(
            rewrite_private_image(
                &src_registry(),
                &format!("images.customer.io/app/api:1.0@{}", DIGEST),
                "myapp"
            )
            .unwrap(),
            format!("registry.vendor.com/app/api@{}", DIGEST)
        );
    }

    #[test]
    fn test_private_image_without_proxy() {
        let src = RegistryOptions::new("registry.vendor.com", "");
        assert!(rewrite_private_image(&src, "quay.io/org/api", "myapp").is_err());
    }

    #[test]
    fn test_kustomize_serialization_omits_empty() {
        let r = rewrite("redis:7", &dest()).unwrap();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "redis",
                "newName": "registry.example.com/team/redis",
                "newTag": "7"
            })
        );
    }
}
