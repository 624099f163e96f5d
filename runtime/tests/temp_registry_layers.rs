//! Layer extraction against a registry serving the `alpine:3.14-multiarch`
//! fixture: a manifest list with seven single-layer platform manifests.

use std::path::PathBuf;

use imgrelay_runtime::oci::{Layer, TempRegistry, MANIFEST_MEDIA_TYPES};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("alpine-3.14-multiarch")
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_dir().join(name))
        .unwrap_or_else(|e| panic!("fixture {}: {}", name, e))
}

/// Serve the manifest list under `tag` and every platform manifest by
/// digest. Returns the mocks so the caller can assert they were hit.
async fn serve_fixture(server: &mut mockito::ServerGuard, tag: &str) -> Vec<mockito::Mock> {
    let index = read_fixture("index.json");
    let list: serde_json::Value = serde_json::from_str(&index).unwrap();
    let mut mocks = Vec::new();

    mocks.push(
        server
            .mock("GET", format!("/v2/alpine/manifests/{}", tag).as_str())
            .match_header(
                "accept",
                mockito::Matcher::Regex(regex::escape(MANIFEST_MEDIA_TYPES[1])),
            )
            .with_status(200)
            .with_header(
                "content-type",
                "application/vnd.docker.distribution.manifest.list.v2+json",
            )
            .with_body(index)
            .create_async()
            .await,
    );

    for entry in list["manifests"].as_array().unwrap() {
        let digest = entry["digest"].as_str().unwrap();
        let platform = &entry["platform"];
        let name = format!(
            "manifest-{}{}.json",
            platform["architecture"].as_str().unwrap(),
            platform["variant"].as_str().unwrap_or("")
        );
        mocks.push(
            server
                .mock("GET", format!("/v2/alpine/manifests/{}", digest).as_str())
                .with_status(200)
                .with_header(
                    "content-type",
                    "application/vnd.docker.distribution.manifest.v2+json",
                )
                .with_body(read_fixture(&name))
                .create_async()
                .await,
        );
    }
    mocks
}

#[tokio::test]
async fn test_multiarch_fixture_yields_seven_layers() {
    let mut server = mockito::Server::new_async().await;
    let mocks = serve_fixture(&mut server, "3.14-multiarch").await;
    let registry = TempRegistry::attach(server.socket_address().port());

    let layers = registry
        .get_image_layers("alpine:3.14-multiarch")
        .await
        .unwrap();

    let expected: Vec<Layer> = serde_json::from_str(&read_fixture("expected-layers.json")).unwrap();
    assert_eq!(layers.len(), 7);
    assert_eq!(layers, expected);
    for mock in mocks {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_layers_follow_list_order() {
    let mut server = mockito::Server::new_async().await;
    serve_fixture(&mut server, "3.14-multiarch").await;
    let registry = TempRegistry::attach(server.socket_address().port());

    // The host part of the image is irrelevant: the local registry stores
    // images under their final path segment.
    let layers = registry
        .get_image_layers("registry.example.com/mirror/library/alpine:3.14-multiarch")
        .await
        .unwrap();
    let expected: Vec<Layer> = serde_json::from_str(&read_fixture("expected-layers.json")).unwrap();
    assert_eq!(layers, expected);
    assert_eq!(layers[0].size, 2811478);
}

#[tokio::test]
async fn test_src_ref_points_at_local_registry() {
    let server = mockito::Server::new_async().await;
    let port = server.socket_address().port();
    let registry = TempRegistry::attach(port);

    assert_eq!(
        registry.src_ref("docker.io/library/alpine:3.14-multiarch").unwrap(),
        format!("localhost:{}/alpine:3.14-multiarch", port)
    );
}
