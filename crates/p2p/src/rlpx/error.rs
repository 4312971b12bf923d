use ethlink_rlp::error::{RLPDecodeError, RLPEncodeError};
use thiserror::Error;

use super::message::Message;

/// The handshake/session error surface. Every variant is fatal for the connection it
/// occurred on; nothing here is retried on the same socket.
#[derive(Debug, Error)]
pub enum RLPxError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("invalid connection state for this operation")]
    InvalidState,
    #[error("rlp decode error: {0}")]
    Decode(#[from] RLPDecodeError),
    #[error("rlp encode error: {0}")]
    Encode(#[from] RLPEncodeError),
    #[error("peer id does not match the expected node id")]
    InvalidPeerId,
    #[error("received an unexpected message: {0}")]
    UnexpectedMessage(Message),
    #[error("cryptography error: {0}")]
    Cryptography(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer: {0}")]
    Disconnected(String),
    #[error("handshake or request timed out")]
    Timeout,
}

impl From<k256::ecdsa::Error> for RLPxError {
    fn from(err: k256::ecdsa::Error) -> Self {
        RLPxError::Cryptography(err.to_string())
    }
}

impl From<k256::elliptic_curve::Error> for RLPxError {
    fn from(err: k256::elliptic_curve::Error) -> Self {
        RLPxError::Cryptography(err.to_string())
    }
}

impl From<aes::cipher::InvalidLength> for RLPxError {
    fn from(err: aes::cipher::InvalidLength) -> Self {
        RLPxError::Cryptography(err.to_string())
    }
}

impl From<ctr::cipher::StreamCipherError> for RLPxError {
    fn from(err: ctr::cipher::StreamCipherError) -> Self {
        RLPxError::Cryptography(err.to_string())
    }
}
