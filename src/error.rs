use thiserror::Error;

/// Failure talking to one of the Spotify HTTP services.
#[derive(Debug, Error)]
pub enum ServiceError {
  /// 401: the bearer token (or client) was rejected.
  #[error("request unauthorized (status {0})")]
  Unauthorized(u16),
  #[error("service returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("malformed response: {0}")]
  Decode(String),
  #[error("request timed out")]
  Timeout,
  /// The lookup was relayed through another context and the relay failed.
  #[error(transparent)]
  Relay(#[from] RpcError),
}

impl ServiceError {
  pub fn is_unauthorized(&self) -> bool {
    matches!(self, ServiceError::Unauthorized(_))
  }
}

/// Failure of a cross-context request/response round trip.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RpcError {
  #[error("no response within {0} ms")]
  Timeout(u128),
  #[error("the receiving context is gone")]
  Disconnected,
  #[error("unexpected response: {0}")]
  UnexpectedResponse(String),
}
