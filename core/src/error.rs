use thiserror::Error;

/// imgrelay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// Image text could not be split into host/path/tag/digest
    #[error("Malformed image reference '{reference}': {reason}")]
    MalformedReference { reference: String, reason: String },

    /// Registry presented neither a basic nor a bearer challenge
    #[error("Unsupported auth challenge from {registry}: {challenge}")]
    AuthChallengeUnsupported { registry: String, challenge: String },

    /// Credentials were rejected by the registry or its token service
    #[error("Authentication failed for {registry}: {message}")]
    AuthenticationFailed { registry: String, message: String },

    /// Network or connect failure
    #[error("Registry {registry} unreachable: {message}")]
    RegistryUnreachable { registry: String, message: String },

    /// Manifest or manifest-list bytes could not be decoded
    #[error("Manifest decode error: {0}")]
    ManifestDecode(String),

    /// An image copy failed after all attempts
    #[error("Failed to transfer {image} after {attempts} attempt(s): {message}")]
    Transfer {
        image: String,
        attempts: u32,
        message: String,
    },

    /// Registry returned an unexpected response
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// ECR authorization token exchange failed
    #[error("ECR error: {0}")]
    Ecr(String),

    /// Ephemeral registry failed to start or answer
    #[error("Temp registry error: {0}")]
    TempRegistry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Shorthand for a malformed reference.
    pub fn malformed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::MalformedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may retry the failed operation.
    ///
    /// Malformed input, unsupported challenges and undecodable manifests
    /// fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::RegistryUnreachable { .. } | RelayError::Transfer { .. }
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for RelayError {
    fn from(err: serde_yaml::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

/// Result type alias for imgrelay operations
pub type Result<T> = std::result::Result<T, RelayError>;
