use thiserror::Error;

/// Error type for job backend operations.
#[derive(Debug, Error)]
pub enum JobError {
  /// Transport-level failure talking to the backend.
  #[error("job backend request failed")]
  Transport(#[from] reqwest::Error),

  /// The backend answered but rejected the operation.
  #[error("job backend rejected '{job_id}': {message}")]
  Rejected { job_id: String, message: String },

  /// The backend answered with a payload we could not interpret.
  #[error("invalid job backend response: {0}")]
  InvalidResponse(String),
}
