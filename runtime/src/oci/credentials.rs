//! Registry credentials and the login file written by `imgrelay login`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use imgrelay_core::error::{RelayError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use serde::{Deserialize, Serialize};

use super::endpoint::auth_host;

/// Username/password pair for a container registry, or anonymous access.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryCredentials {
    /// Anonymous access (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Credentials from the credential store, falling back to env vars,
    /// then anonymous.
    pub fn from_credential_store(registry: &str) -> Self {
        if let Ok(store) = CredentialStore::default_path() {
            if let Ok(Some(credentials)) = store.get(registry) {
                return credentials;
            }
        }
        Self::from_env()
    }

    /// Build from optional strings; empty values count as absent.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Self {
        match (
            username.filter(|u| !u.is_empty()),
            password.filter(|p| !p.is_empty()),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// One stored login; `auth` is base64 `user:password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthEntry {
    auth: String,
}

/// Docker `config.json` shaped file: `{"auths": {"<host>": {"auth": ".."}}}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
}

impl AuthEntry {
    fn encode(username: &str, password: &str) -> Self {
        Self {
            auth: STANDARD.encode(format!("{}:{}", username, password)),
        }
    }

    fn decode(&self) -> Option<RegistryCredentials> {
        let bytes = STANDARD.decode(self.auth.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let (username, password) = text.split_once(':')?;
        Some(RegistryCredentials::basic(username, password))
    }
}

/// Logins saved by `imgrelay login`, keyed by [`auth_host`].
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// `~/.imgrelay/auth/credentials.json`
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| RelayError::Config("no home directory for credential store".to_string()))?;
        Ok(Self::new(home.join(".imgrelay").join("auth").join("credentials.json")))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Save a login, replacing any previous one for the same host.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.read()?;
        file.auths
            .insert(auth_host(registry), AuthEntry::encode(username, password));
        self.write(&file)
    }

    /// Saved login for `registry`. Entries that fail to decode are ignored.
    pub fn get(&self, registry: &str) -> Result<Option<RegistryCredentials>> {
        let file = self.read()?;
        let host = auth_host(registry);
        let credentials = file.auths.get(&host).and_then(AuthEntry::decode);
        if credentials.is_none() && file.auths.contains_key(&host) {
            tracing::warn!(registry = %host, "Ignoring undecodable stored credentials");
        }
        Ok(credentials)
    }

    /// Forget the login for `registry`. Returns whether one existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.read()?;
        if file.auths.remove(&auth_host(registry)).is_none() {
            return Ok(false);
        }
        self.write(&file)?;
        Ok(true)
    }

    fn read(&self) -> Result<AuthFile> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                RelayError::Serialization(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AuthFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic replace through a temp file in the same directory.
    fn write(&self, file: &AuthFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, file)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("credentials.json"))
    }

    #[test]
    fn test_credentials_anonymous() {
        let creds = RegistryCredentials::anonymous();
        assert!(creds.is_anonymous());
        assert!(matches!(creds.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_credentials_basic() {
        let creds = RegistryCredentials::basic("user", "pass");
        assert!(!creds.is_anonymous());
        assert!(matches!(creds.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_from_parts_treats_empty_as_absent() {
        assert!(RegistryCredentials::from_parts(Some(""), Some("p")).is_anonymous());
        assert!(RegistryCredentials::from_parts(None, None).is_anonymous());
        assert_eq!(
            RegistryCredentials::from_parts(Some("u"), Some("p")),
            RegistryCredentials::basic("u", "p")
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = RegistryCredentials::basic("user", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_store_and_get() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.store("ghcr.io", "user1", "pass1").unwrap();
        assert_eq!(
            store.get("ghcr.io").unwrap(),
            Some(RegistryCredentials::basic("user1", "pass1"))
        );
        assert_eq!(store.get("quay.io").unwrap(), None);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.store("ghcr.io", "user1", "pass1").unwrap();
        assert!(store.remove("ghcr.io").unwrap());
        assert!(!store.remove("ghcr.io").unwrap());
        assert_eq!(store.get("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_docker_hub_spellings_share_entry() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.store("https://docker.io/v2/", "user", "pass").unwrap();
        let expected = Some(RegistryCredentials::basic("user", "pass"));
        assert_eq!(store.get("index.docker.io").unwrap(), expected);
        assert_eq!(store.get("registry-1.docker.io").unwrap(), expected);
        assert_eq!(store.get("DOCKER.IO").unwrap(), expected);
    }

    #[test]
    fn test_file_uses_docker_auth_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        CredentialStore::new(path.clone())
            .store("ghcr.io", "user", "p:ss")
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["auths"]["ghcr.io"]["auth"], STANDARD.encode("user:p:ss"));
        assert_eq!(
            CredentialStore::new(path).get("ghcr.io").unwrap(),
            Some(RegistryCredentials::basic("user", "p:ss"))
        );
    }

    #[test]
    fn test_undecodable_entry_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"auths":{"ghcr.io":{"auth":"not base64!"}}}"#).unwrap();

        assert_eq!(CredentialStore::new(path).get("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{").unwrap();

        let err = CredentialStore::new(path).get("ghcr.io").unwrap_err();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
