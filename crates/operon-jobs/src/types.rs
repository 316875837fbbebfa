//! Wire types for the job backend.

use serde::{Deserialize, Serialize};

/// Terminal-or-running state reported by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  Running,
  Completed,
  Failed,
}

impl JobState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobState::Completed | JobState::Failed)
  }
}

/// Full job record sent along with the confirmation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
  pub id: String,
  /// Display name; mirrors the job type.
  pub name: String,
  pub function_name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub parameters: serde_json::Map<String, serde_json::Value>,
  pub block_id: String,
}

impl JobDescriptor {
  /// Build a descriptor for one block invocation with a generated id.
  pub fn new(
    job_type: &str,
    description: Option<&str>,
    parameters: serde_json::Map<String, serde_json::Value>,
    block_id: &str,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      name: job_type.to_string(),
      function_name: job_type.to_string(),
      description: description.map(str::to_string),
      parameters,
      block_id: block_id.to_string(),
    }
  }
}

/// Response to a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
  pub job_id: String,
}

/// The job half of a confirmation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedJob {
  pub block_id: String,
}

/// Response to the confirmation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfirmation {
  pub success: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub job: Option<ConfirmedJob>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

/// One poll observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPoll {
  pub status: JobState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// One block output inside a combined download request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleItem {
  pub output_type: String,
  pub data: serde_json::Value,
}

/// Response to a bundling request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleResult {
  pub download_url: String,
}
