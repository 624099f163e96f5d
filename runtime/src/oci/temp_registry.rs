//! Ephemeral local registry for air-gap bundles.
//!
//! Launches a Docker Registry V2 server over a directory of pre-pulled blobs
//! on a free loopback port. Each air-gap extraction owns one instance; the
//! server is interrupted when the instance is stopped or dropped.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use imgrelay_core::config::TempRegistryConfig;
use imgrelay_core::error::{RelayError, Result};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;

use super::manifest::{accept_header, parse_manifest, Layer, ManifestKind};
use super::reference::ImageReference;

/// Registry server configuration; `__ROOT_DIR__` and `__PORT__` are
/// substituted on start.
const CONFIG_TEMPLATE: &str = r#"version: 0.1
log:
  level: error
  accesslog:
    disabled: true
storage:
  filesystem:
    rootdirectory: __ROOT_DIR__
  delete:
    enabled: true
  maintenance:
    uploadpurging:
      enabled: false
http:
  addr: 127.0.0.1:__PORT__
"#;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Deeper manifest-list nesting is treated as a reference loop.
const MAX_LIST_DEPTH: usize = 4;

/// Lifecycle state of a [`TempRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Stopped,
    Starting,
    Ready,
}

impl std::fmt::Display for RegistryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryState::Stopped => write!(f, "stopped"),
            RegistryState::Starting => write!(f, "starting"),
            RegistryState::Ready => write!(f, "ready"),
        }
    }
}

/// A disposable registry server process.
#[derive(Debug)]
pub struct TempRegistry {
    binary: PathBuf,
    ready_timeout: Duration,
    state: RegistryState,
    port: Option<u16>,
    child: Option<Child>,
    http: reqwest::Client,
}

impl TempRegistry {
    pub fn new(config: &TempRegistryConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
            state: RegistryState::Stopped,
            port: None,
            child: None,
            http: reqwest::Client::new(),
        }
    }

    /// Use a registry that is already listening on `port` without spawning
    /// a process. Stopping it only resets local state.
    pub fn attach(port: u16) -> Self {
        let mut registry = Self::new(&TempRegistryConfig::default());
        registry.port = Some(port);
        registry.state = RegistryState::Ready;
        registry
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `localhost:<port>` while running.
    pub fn endpoint(&self) -> Result<String> {
        Ok(format!("localhost:{}", self.ready_port()?))
    }

    /// Start the server over `root_dir` and wait until it answers.
    ///
    /// On failure the instance is stopped before the error is returned.
    pub async fn start(&mut self, root_dir: &Path) -> Result<()> {
        if self.state != RegistryState::Stopped {
            return Err(RelayError::TempRegistry(format!(
                "cannot start registry in state {}",
                self.state
            )));
        }
        self.state = RegistryState::Starting;

        let result = self.launch(root_dir).await;
        if let Err(ref e) = result {
            tracing::warn!(error = %e, "Temporary registry failed to start");
            self.stop();
        }
        result
    }

    async fn launch(&mut self, root_dir: &Path) -> Result<()> {
        let port = free_port()?;
        self.port = Some(port);

        let config = render_config(root_dir, port);
        let mut config_file = tempfile::Builder::new()
            .prefix("imgrelay-registry-")
            .suffix(".yml")
            .tempfile()?;
        config_file.write_all(config.as_bytes())?;
        config_file.flush()?;

        let child = Command::new(&self.binary)
            .arg("serve")
            .arg(config_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RelayError::TempRegistry(format!(
                    "failed to spawn {}: {} (is the registry binary installed?)",
                    self.binary.display(),
                    e
                ))
            })?;

        tracing::info!(
            pid = child.id(),
            port,
            root = %root_dir.display(),
            "Temporary registry started"
        );
        self.child = Some(child);

        self.wait_for_ready(self.ready_timeout).await?;
        // The server has read its config; the temp file goes with `config_file`.
        drop(config_file);

        self.state = RegistryState::Ready;
        Ok(())
    }

    /// Poll `GET /` once per second until it returns 200 or `timeout`
    /// elapses.
    pub async fn wait_for_ready(&mut self, timeout: Duration) -> Result<()> {
        let port = self.port.ok_or_else(|| {
            RelayError::TempRegistry("registry has no port assigned".to_string())
        })?;
        let url = format!("http://127.0.0.1:{}/", port);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(ref mut child) = self.child {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(RelayError::TempRegistry(format!(
                        "registry exited before becoming ready ({})",
                        status
                    )));
                }
            }

            match self.http.get(&url).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    tracing::debug!(port, "Temporary registry is ready");
                    return Ok(());
                }
                Ok(resp) => tracing::debug!(port, status = %resp.status(), "Registry not ready"),
                Err(e) => tracing::debug!(port, error = %e, "Registry not ready"),
            }

            if Instant::now() + READY_POLL_INTERVAL > deadline {
                return Err(RelayError::TempRegistry(format!(
                    "registry on port {} not ready after {:?}",
                    port, timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Interrupt the server process, if any, and reset to stopped.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            interrupt(&mut child);
            let deadline = Instant::now() + STOP_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => {
                        std::thread::sleep(Duration::from_millis(50))
                    }
                    _ => {
                        tracing::warn!(pid, "Registry ignored interrupt, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
            tracing::info!(pid, "Temporary registry stopped");
        }
        self.port = None;
        self.state = RegistryState::Stopped;
    }

    /// Layers of `image`, flattening every architecture of a manifest list
    /// in list order.
    pub async fn get_image_layers(&self, image: &str) -> Result<Vec<Layer>> {
        let reference = ImageReference::parse(image)?;
        let repository = reference.last_segment().to_string();
        let mut layers = Vec::new();
        self.collect_layers(&repository, reference.manifest_reference(), 0, &mut layers)
            .await?;
        tracing::debug!(image, count = layers.len(), "Resolved image layers");
        Ok(layers)
    }

    async fn collect_layers(
        &self,
        repository: &str,
        reference: &str,
        depth: usize,
        out: &mut Vec<Layer>,
    ) -> Result<()> {
        if depth > MAX_LIST_DEPTH {
            return Err(RelayError::ManifestDecode(format!(
                "manifest lists nested deeper than {} levels in {}",
                MAX_LIST_DEPTH, repository
            )));
        }

        let bytes = self.fetch_manifest(repository, reference).await?;
        match parse_manifest(&bytes)? {
            ManifestKind::Image(manifest) => out.extend(manifest.layers()),
            ManifestKind::List(list) => {
                for entry in &list.manifests {
                    Box::pin(self.collect_layers(repository, &entry.digest, depth + 1, out))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn fetch_manifest(&self, repository: &str, reference: &str) -> Result<Vec<u8>> {
        let port = self.ready_port()?;
        let url = format!(
            "http://127.0.0.1:{}/v2/{}/manifests/{}",
            port, repository, reference
        );
        let registry = format!("localhost:{}", port);

        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, accept_header())
            .send()
            .await
            .map_err(|e| RelayError::RegistryUnreachable {
                registry: registry.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RelayError::Registry {
                registry,
                message: format!(
                    "GET manifest {}:{} returned {}",
                    repository, reference, status
                ),
            });
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RelayError::RegistryUnreachable {
                registry,
                message: format!("reading manifest {}:{}: {}", repository, reference, e),
            })
    }

    /// `localhost:<port>/<lastSegment>[:tag|@digest]` for an image stored
    /// in this registry.
    pub fn src_ref(&self, image: &str) -> Result<String> {
        let port = self.ready_port()?;
        let reference = ImageReference::parse(image)?;
        Ok(format!(
            "localhost:{}/{}{}",
            port,
            reference.last_segment(),
            reference.suffix()
        ))
    }

    fn ready_port(&self) -> Result<u16> {
        match (self.state, self.port) {
            (RegistryState::Ready, Some(port)) => Ok(port),
            (state, _) => Err(RelayError::TempRegistry(format!(
                "registry is {}, not ready",
                state
            ))),
        }
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_config(root_dir: &Path, port: u16) -> String {
    CONFIG_TEMPLATE
        .replace("__ROOT_DIR__", &root_dir.display().to_string())
        .replace("__PORT__", &port.to_string())
}

/// Ask the OS for an unused loopback port.
fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn interrupt(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: `pid` belongs to a child we spawned and have not reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_config() {
        let config = render_config(Path::new("/var/lib/bundle"), 5123);
        assert!(config.contains("rootdirectory: /var/lib/bundle"));
        assert!(config.contains("addr: 127.0.0.1:5123"));
        assert!(!config.contains("__"));
    }

    #[test]
    fn test_free_port() {
        assert!(free_port().unwrap() > 0);
    }

    #[test]
    fn test_new_is_stopped() {
        let reg = TempRegistry::new(&TempRegistryConfig::default());
        assert_eq!(reg.state(), RegistryState::Stopped);
        assert!(reg.port().is_none());
        assert!(reg.endpoint().is_err());
        assert!(reg.src_ref("alpine:3.14").is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut reg = TempRegistry::attach(5000);
        reg.stop();
        reg.stop();
        assert_eq!(reg.state(), RegistryState::Stopped);
        assert!(reg.port().is_none());
    }

    #[test]
    fn test_src_ref_flattens_path() {
        let reg = TempRegistry::attach(5000);
        assert_eq!(
            reg.src_ref("quay.io/org/team/app:1.2").unwrap(),
            "localhost:5000/app:1.2"
        );
        let digest = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(
            reg.src_ref(&format!("registry:5443/ns/app:1.0@{}", digest)).unwrap(),
            format!("localhost:5000/app@{}", digest)
        );
        assert_eq!(reg.src_ref("redis").unwrap(), "localhost:5000/redis");
    }

    #[tokio::test]
    async fn test_start_missing_binary_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = TempRegistry::new(&TempRegistryConfig {
            binary: dir.path().join("no-such-registry"),
            ready_timeout_secs: 1,
        });
        let err = reg.start(dir.path()).await.unwrap_err();
        assert!(matches!(err, RelayError::TempRegistry(_)));
        assert_eq!(reg.state(), RegistryState::Stopped);
        assert!(reg.port().is_none());
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = TempRegistry::attach(5000);
        assert!(reg.start(dir.path()).await.is_err());
        // The attached instance is left as it was.
        assert_eq!(reg.state(), RegistryState::Ready);
    }

    #[tokio::test]
    async fn test_wait_for_ready() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/").with_status(200).create_async().await;
        let port = server.socket_address().port();

        let mut reg = TempRegistry::attach(port);
        reg.wait_for_ready(Duration::from_secs(3)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_wait_for_ready_times_out() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/").with_status(503).create_async().await;
        let port = server.socket_address().port();

        let mut reg = TempRegistry::attach(port);
        let err = reg.wait_for_ready(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, RelayError::TempRegistry(_)));
    }

    #[tokio::test]
    async fn test_get_image_layers_single_manifest() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/nginx/manifests/1.25")
            .match_header("accept", mockito::Matcher::Regex("manifest.list.v2".into()))
            .with_status(200)
            .with_body(
                r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json",
                "config":{"digest":"sha256:cfg","size":10},
                "layers":[{"digest":"sha256:one","size":11},{"digest":"sha256:two","size":22}]}"#,
            )
            .create_async()
            .await;

        let reg = TempRegistry::attach(server.socket_address().port());
        let layers = reg.get_image_layers("docker.io/library/nginx:1.25").await.unwrap();
        assert_eq!(
            layers,
            vec![
                Layer { digest: "sha256:one".into(), size: 11 },
                Layer { digest: "sha256:two".into(), size: 22 },
            ]
        );
    }

    #[tokio::test]
    async fn test_get_image_layers_two_arch_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/app/manifests/latest")
            .with_status(200)
            .with_body(
                r#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[
                {"digest":"sha256:amd","size":1,"platform":{"os":"linux","architecture":"amd64"}},
                {"digest":"sha256:arm","size":1,"platform":{"os":"linux","architecture":"arm64"}}]}"#,
            )
            .create_async()
            .await;
        for (digest, layer, size) in [("sha256:amd", "sha256:l-amd", 100), ("sha256:arm", "sha256:l-arm", 200)] {
            server
                .mock("GET", format!("/v2/app/manifests/{}", digest).as_str())
                .with_status(200)
                .with_body(format!(
                    r#"{{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json",
                    "config":{{"digest":"sha256:c","size":1}},
                    "layers":[{{"digest":"{}","size":{}}}]}}"#,
                    layer, size
                ))
                .create_async()
                .await;
        }

        let reg = TempRegistry::attach(server.socket_address().port());
        let layers = reg.get_image_layers("ns/app").await.unwrap();
        assert_eq!(
            layers,
            vec![
                Layer { digest: "sha256:l-amd".into(), size: 100 },
                Layer { digest: "sha256:l-arm".into(), size: 200 },
            ]
        );
    }

    #[tokio::test]
    async fn test_get_image_layers_missing_manifest() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/gone/manifests/latest")
            .with_status(404)
            .create_async()
            .await;

        let reg = TempRegistry::attach(server.socket_address().port());
        let err = reg.get_image_layers("gone").await.unwrap_err();
        assert!(matches!(err, RelayError::Registry { .. }));
    }
}
