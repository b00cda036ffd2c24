use crate::codec::CodecError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The signer declined the request. Never surfaced as a failure.
    #[error("request rejected by the wallet")]
    UserRejected,
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("transaction reverted: {0}")]
    TransactionReverted(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] CodecError),
    #[error("another transaction is still in flight")]
    Busy,
    #[error("wallet is not connected")]
    NotConnected,
    #[error("chain parameters have not been loaded yet")]
    NotSynchronized,
    #[error("no signer attached")]
    NoSigner,
}

impl ClientError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        ClientError::Rpc(err.to_string())
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::UserRejected)
    }

    pub fn short_message(&self) -> String {
        match self {
            ClientError::TransactionReverted(reason) if !reason.is_empty() => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
