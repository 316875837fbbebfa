//! The job backend trait.

use async_trait::async_trait;

use crate::error::JobError;
use crate::types::{
  BundleItem, BundleResult, JobConfirmation, JobDescriptor, JobPoll, JobSubmission,
};

/// Contract the engine holds against the job backend.
///
/// The engine submits one job per block invocation, confirms it, then
/// polls until a terminal state. `bundle` is the combined-download
/// operation used by the aggregator block.
#[async_trait]
pub trait JobService: Send + Sync {
  /// Register a unit of work for a block type with its resolved payload.
  async fn submit(
    &self,
    job_type: &str,
    payload: serde_json::Map<String, serde_json::Value>,
  ) -> Result<JobSubmission, JobError>;

  /// Pre-submission confirmation step; polling only starts after a
  /// successful confirmation.
  async fn confirm(
    &self,
    job_id: &str,
    descriptor: &JobDescriptor,
  ) -> Result<JobConfirmation, JobError>;

  /// Report the current status of a job.
  async fn poll(&self, job_id: &str) -> Result<JobPoll, JobError>;

  /// Assemble a combined download from several block outputs.
  async fn bundle(&self, items: &[BundleItem]) -> Result<BundleResult, JobError>;
}
