use thiserror::Error;

/// Top-level error type shared by netsync crates.
#[derive(Error, Debug)]
pub enum NetsyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Inventory error: {0}")]
    Inventory(String),

    /// An interface or membership was written before the row it hangs off.
    #[error("Missing parent: {0}")]
    MissingParent(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
