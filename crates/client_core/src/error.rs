use shared::{domain::TurnId, error::ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown turn {0}")]
    UnknownTurn(TurnId),
    #[error("stream transport failed: {0}")]
    Transport(String),
    #[error("http stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("failed to export turns: {0}")]
    Export(#[from] serde_json::Error),
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
