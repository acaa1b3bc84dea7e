//! Error kinds for chain reads, block resolution and the cache document

use thiserror::Error;

pub type Result<T> = std::result::Result<T, YieldError>;

#[derive(Debug, Error)]
pub enum YieldError {
    /// Target timestamp is newer than the chain head
    #[error("timestamp {target} is in the future (chain head at {head_timestamp})")]
    OutOfRange { target: i64, head_timestamp: i64 },

    /// A single RPC/HTTP attempt failed. Retried by [`crate::chain::retry`].
    #[error("rpc request failed: {0}")]
    Rpc(String),

    /// Retries exhausted
    #[error("{operation} failed after {attempts} attempts: {message}")]
    TransientReadFailure {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Contract call reverted at the requested block
    #[error("call to {method} reverted: {message}")]
    Reverted { method: String, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("vault {address} has no registered price-per-share strategy '{strategy}'")]
    UnknownVaultStrategy { address: String, strategy: String },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("another update run holds the lock at {0}")]
    RunInProgress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl YieldError {
    /// Whether another attempt of the same read may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, YieldError::Rpc(_))
    }

    pub(crate) fn decode(what: impl Into<String>, message: impl ToString) -> Self {
        YieldError::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for YieldError {
    fn from(e: reqwest::Error) -> Self {
        YieldError::Rpc(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rpc_failures_are_transient() {
        assert!(YieldError::Rpc("timeout".into()).is_transient());
        assert!(
            !YieldError::OutOfRange {
                target: 10,
                head_timestamp: 5
            }
            .is_transient()
        );
        assert!(
            !YieldError::Reverted {
                method: "convertToAssets".into(),
                message: "execution reverted".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_out_of_range_message() {
        let err = YieldError::OutOfRange {
            target: 2001,
            head_timestamp: 2000,
        };
        assert!(err.to_string().contains("in the future"));
    }
}
