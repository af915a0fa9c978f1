use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("participant not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("reward issuer unavailable: {0}")]
    RewardUnavailable(String),
}
