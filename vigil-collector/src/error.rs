/// Collector-level failures. Staleness is a state transition, not an error,
/// so it has no variant here.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Malformed terminal identity: {0:?}")]
    MalformedIdentity(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
