use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed stream event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unrecognized phase name '{0}'")]
    UnknownPhase(String),
    #[error("empty stream event line")]
    EmptyLine,
}
