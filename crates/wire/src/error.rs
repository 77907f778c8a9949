use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("RLP error: {0}")]
    Rlp(String),
    #[error("snappy error: {0}")]
    Snappy(String),
    #[error("{message}: {reason}")]
    Message {
        message: &'static str,
        reason: String,
    },
    #[error("{field}: expected {expected} bytes, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

impl Error {
    pub(crate) fn message(message: &'static str, reason: impl Into<String>) -> Self {
        Error::Message {
            message,
            reason: reason.into(),
        }
    }
}
