use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SniperError {
    // Network hiccups, rate limits, dropped connections. Safe to retry.
    #[error("Provider error: {0}")]
    TransientProvider(String),

    #[error("Contract call reverted: {0}")]
    CallReverted(String),

    #[error("Quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimationFailed(String),

    #[error("Insufficient allowance: {0}")]
    InsufficientAllowance(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Transaction {0} reverted")]
    ConfirmationFailed(String),

    #[error("Timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(String),

    #[error("Watcher is already listening")]
    AlreadyListening,

    #[error("Engine not initialized: no signing credential")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Already holding token {0}")]
    AlreadyHolding(String),

    #[error("Snipe already in flight for token {0}")]
    SnipeInFlight(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Limit order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl SniperError {
    /// Only provider-level failures are worth retrying; everything else is
    /// either deterministic (reverts, bad config) or must not be repeated
    /// blindly (submissions).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }
}

pub type SniperResult<T> = std::result::Result<T, SniperError>;
