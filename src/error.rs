use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything the library can fail with.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller supplied an unusable combination of arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid contract address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The warehouse accepted the request but failed or rejected the query.
    #[error("warehouse query failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    #[error("warehouse transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A returned cell did not decode into the expected column type.
    #[error("cannot decode column {column}: {reason}")]
    Decode { column: String, reason: String },
}

impl Error {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn upstream<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn decode<C: Into<String>, R: ToString>(column: C, reason: R) -> Self {
        Self::Decode {
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidAddress { .. })
    }
}
