use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failure to hand a message to the bus for delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("bus not connected")]
    NotConnected,

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish not acknowledged within {0:?}")]
    Timeout(Duration),

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Failure to establish a bus subscription.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("bus not connected")]
    NotConnected,

    #[error("subscribe rejected: {0}")]
    Rejected(String),

    #[error("subscribe not confirmed within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("presence tracker stopped")]
    TrackerStopped,

    #[error("{0}")]
    Other(String),
}
