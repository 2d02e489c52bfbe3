use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("event bus is shut down")]
    ShutDown,
}
