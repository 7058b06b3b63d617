use thiserror::Error;

/// Raised by a [`RequestQueue`](crate::queue::RequestQueue) handle whose task
/// never ran to completion.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queued request was cleared before it ran")]
    Cleared,
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] core_encoding::EncodingError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Gateway returned HTTP {status} for {url}")]
    Gateway { status: u16, url: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResourceError {
    /// Environmental failure that a later attempt may not hit.
    pub fn is_transient(&self) -> bool {
        match self {
            ResourceError::Bridge(e) => e.is_transient(),
            ResourceError::Gateway { status, .. } => *status == 404 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ResourceError::Cancelled
                | ResourceError::Queue(QueueError::Cleared)
                | ResourceError::Bridge(bridge_traits::BridgeError::Cancelled)
        )
    }

    /// Caller bug rather than an environmental condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, ResourceError::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
