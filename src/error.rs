use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Script metadata errors
    #[error("Multiple {block} blocks found")]
    MultipleMetadataBlocks { block: String },

    #[error("Malformed dependencies: {reason}")]
    MalformedDependencies { reason: String },

    #[error("Invalid script metadata: {0}")]
    MetadataParse(String),

    // Dependency installation errors
    #[error("Failed to install dependencies:\n{log}")]
    InstallFailed { log: String },

    #[error("Installer failed: {0}")]
    Installer(String),

    // Request errors
    #[error("Request body is empty")]
    EmptySource,

    #[error("Request body is not valid UTF-8")]
    InvalidEncoding,

    #[error("Invalid file name: {name:?}")]
    InvalidFileName { name: String },

    #[error("No active file in request")]
    NoActiveFile,

    // Runtime errors
    #[error("Runtime '{runtime}' is not available: {reason}")]
    RuntimeNotAvailable { runtime: String, reason: String },

    #[error("Runtime protocol error: {0}")]
    RuntimeProtocol(String),

    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    // Result rendering errors
    #[error("Failed to serialize response: {0}")]
    Serialization(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// HTTP-style status class a transport layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::EmptySource
            | Self::InvalidEncoding
            | Self::InvalidFileName { .. }
            | Self::NoActiveFile
            | Self::Serialization(_) => 400,
            Self::InstallFailed { .. } => 424,
            Self::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Faults caused by the request rather than by the host.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
