//! Gateway errors.

use thiserror::Error;

/// Errors that can occur talking to the remote workflow engine.
#[derive(Debug, Error)]
pub enum GatewayError {
  /// The HTTP request could not be sent or its body could not be read.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The engine answered with a non-success status.
  #[error("engine returned {status}: {body}")]
  Status { status: u16, body: String },

  /// The requested run or task does not exist.
  #[error("not found: {resource}")]
  NotFound { resource: String },

  /// Credentials were rejected or the token exchange failed.
  #[error("authentication failed: {message}")]
  Auth { message: String },

  /// The engine's response did not have the expected shape.
  #[error("invalid response: {message}")]
  Decode { message: String },

  /// The engine is temporarily unreachable.
  #[error("engine unavailable: {message}")]
  Unavailable { message: String },
}

impl GatewayError {
  pub fn not_found(resource: impl Into<String>) -> Self {
    Self::NotFound {
      resource: resource.into(),
    }
  }

  pub fn unavailable(message: impl Into<String>) -> Self {
    Self::Unavailable {
      message: message.into(),
    }
  }

  /// Whether repeating the same call may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
      Self::Status { status, .. } => *status >= 500 || *status == 429,
      Self::Unavailable { .. } => true,
      Self::NotFound { .. } | Self::Auth { .. } | Self::Decode { .. } => false,
    }
  }
}
