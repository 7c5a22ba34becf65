use std::fmt;

/// Failure taxonomy for the relay layer.
///
/// `Parse`, `ForwardFailure` and `ConnectionLost` are recovered where they
/// happen (logged and discarded). The rest are returned to whoever initiated
/// the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    TransportUnavailable(String),
    NotReady,
    UnregisteredRecipient(String),
    MediaUnavailable(String),
    Parse(String),
    ForwardFailure(String),
    ConnectionLost(String),
}

impl RelayError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            RelayError::NotReady => "NOT_READY",
            RelayError::UnregisteredRecipient(_) => "UNREGISTERED_RECIPIENT",
            RelayError::MediaUnavailable(_) => "MEDIA_UNAVAILABLE",
            RelayError::Parse(_) => "PARSE_ERROR",
            RelayError::ForwardFailure(_) => "FORWARD_FAILURE",
            RelayError::ConnectionLost(_) => "CONNECTION_LOST",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::TransportUnavailable(reason) => {
                write!(f, "{}: {}", self.code(), reason)
            }
            RelayError::NotReady => {
                write!(f, "{}: messaging session is not ready", self.code())
            }
            RelayError::UnregisteredRecipient(address) => {
                write!(f, "{}: {} is not registered on the channel", self.code(), address)
            }
            RelayError::MediaUnavailable(reason) => write!(f, "{}: {}", self.code(), reason),
            RelayError::Parse(reason) => write!(f, "{}: {}", self.code(), reason),
            RelayError::ForwardFailure(reason) => write!(f, "{}: {}", self.code(), reason),
            RelayError::ConnectionLost(reason) => write!(f, "{}: {}", self.code(), reason),
        }
    }
}

impl std::error::Error for RelayError {}
