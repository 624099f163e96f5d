//! Kustomize image substitution plans.

use imgrelay_core::classification::ClassificationCache;
use imgrelay_core::error::Result;
use serde::{Deserialize, Serialize};

use super::endpoint::RegistryOptions;
use super::reference::{strip_tag_and_digest, ImageReference, DEFAULT_TAG};
use super::rewrite::{build_alt_names, rewrite, rewrite_private_image, RewrittenImage};

/// The `images:` section of a kustomization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KustomizeImages {
    pub images: Vec<RewrittenImage>,
}

/// Every alt-name substitution needed to move `images` to `dest`, in
/// input order without duplicates.
pub fn plan_rewrites(images: &[String], dest: &RegistryOptions) -> Result<Vec<RewrittenImage>> {
    let mut plan: Vec<RewrittenImage> = Vec::new();
    for image in images {
        let rewritten = rewrite(image, dest)?;
        push_unique(&mut plan, build_alt_names(&rewritten));
    }
    Ok(plan)
}

/// Substitutions that route the private images of `images` through the
/// proxy registry. Images with no cached classification are skipped.
pub fn private_images_to_proxy(
    images: &[String],
    cache: &ClassificationCache,
    src: &RegistryOptions,
    app_slug: &str,
) -> Result<Vec<RewrittenImage>> {
    let mut plan: Vec<RewrittenImage> = Vec::new();
    for image in images {
        if !cache.get(image).map_or(false, |info| info.is_private) {
            continue;
        }
        let proxied = rewrite_private_image(src, image, app_slug)?;
        if proxied == image.trim() {
            continue;
        }

        let target = ImageReference::parse(&proxied)?;
        let (new_tag, digest) = match (target.digest, target.tag) {
            (Some(digest), _) => (String::new(), digest),
            (None, Some(tag)) => (tag, String::new()),
            (None, None) => (DEFAULT_TAG.to_string(), String::new()),
        };
        let substitution = RewrittenImage {
            name: strip_tag_and_digest(image.trim()),
            new_name: strip_tag_and_digest(&proxied),
            new_tag,
            digest,
        };
        push_unique(&mut plan, build_alt_names(&substitution));
    }
    Ok(plan)
}

/// Render substitutions as a kustomize `images:` YAML document.
pub fn to_kustomize_yaml(images: &[RewrittenImage]) -> Result<String> {
    Ok(serde_yaml::to_string(&KustomizeImages {
        images: images.to_vec(),
    })?)
}

fn push_unique(plan: &mut Vec<RewrittenImage>, entries: Vec<RewrittenImage>) {
    for entry in entries {
        if !plan.contains(&entry) {
            plan.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgrelay_core::classification::ImageInfo;

    fn dest() -> RegistryOptions {
        RegistryOptions::new("registry.example.com", "app")
    }

    #[test]
    fn test_plan_dedupes_and_expands() {
        let images = vec![
            "redis:7".to_string(),
            "docker.io/library/redis:7".to_string(),
            "quay.io/org/api:1.0".to_string(),
        ];
        let plan = plan_rewrites(&images, &dest()).unwrap();
        let names: Vec<_> = plan.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "redis",
                "docker.io/library/redis",
                "library/redis",
                "docker.io/redis",
                "quay.io/org/api",
            ]
        );
        assert!(plan.iter().all(|p| p.new_tag.is_empty() ^ p.digest.is_empty()));
    }

    #[test]
    fn test_plan_propagates_malformed() {
        assert!(plan_rewrites(&["not valid".to_string()], &dest()).is_err());
    }

    #[test]
    fn test_kustomize_yaml() {
        let plan = plan_rewrites(&["quay.io/org/api:1.0".to_string()], &dest()).unwrap();
        let yaml = to_kustomize_yaml(&plan).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let entry = &parsed["images"][0];
        assert_eq!(entry["name"], "quay.io/org/api");
        assert_eq!(entry["newName"], "registry.example.com/app/api");
        assert_eq!(entry["newTag"], "1.0");
        assert!(entry.get("digest").is_none());
    }

    #[test]
    fn test_private_images_to_proxy() {
        let src = RegistryOptions {
            endpoint: "registry.vendor.com".into(),
            proxy_endpoint: "proxy.vendor.com".into(),
            ..Default::default()
        };
        let cache = ClassificationCache::new();
        cache.insert("quay.io/org/api:1.0", ImageInfo { is_private: true });
        cache.insert("redis:7", ImageInfo { is_private: false });
        cache.insert("registry.vendor.com/app/ui:2", ImageInfo { is_private: true });

        let images = vec![
            "quay.io/org/api:1.0".to_string(),
            "redis:7".to_string(),
            "registry.vendor.com/app/ui:2".to_string(),
            "unclassified:1".to_string(),
        ];
        let plan = private_images_to_proxy(&images, &cache, &src, "myapp").unwrap();
        assert_eq!(
            plan,
            vec![RewrittenImage {
                name: "quay.io/org/api".into(),
                new_name: "proxy.vendor.com/proxy/myapp/quay.io/org/api".into(),
                new_tag: "1.0".into(),
                digest: String::new(),
            }]
        );
    }
}
