//! Per-job polling.
//!
//! Each submitted job gets one spawned tracker that polls the backend on
//! a fixed interval until a terminal state or an unrecoverable transport
//! error. Trackers for distinct blocks poll independently; no ordering
//! is guaranteed between them.

use operon_jobs::{JobService, JobState};
use operon_workspace::BlockStatus;
use tracing::{debug, error, info, instrument};

use crate::engine::PipelineEngine;

impl<S: JobService + 'static> PipelineEngine<S> {
  /// Start tracking a confirmed job for a block.
  pub(crate) fn spawn_tracker(&self, job_id: String, block_id: String) {
    let engine = self.clone();
    tokio::spawn(async move {
      engine.track_job(job_id, block_id).await;
    });
  }

  #[instrument(name = "track_job", skip(self), fields(job_id = %job_id, block_id = %block_id))]
  async fn track_job(&self, job_id: String, block_id: String) {
    // First tick fires immediately, matching the original's poll-once-
    // then-interval behavior.
    let mut interval = tokio::time::interval(self.config.poll_interval);

    loop {
      tokio::select! {
        _ = self.shutdown.cancelled() => {
          debug!("tracker stopped by engine shutdown");
          return;
        }
        _ = interval.tick() => {}
      }

      match self.jobs.poll(&job_id).await {
        Ok(poll) => match poll.status {
          JobState::Running => {
            // Still in flight; mirror the status back onto the block.
            if self
              .workspace_write()
              .set_status(&block_id, BlockStatus::Running)
              .is_err()
            {
              debug!("block deleted while job in flight; tracker stopping");
              return;
            }
          }
          JobState::Completed => {
            let result = poll.result.unwrap_or(serde_json::Value::Null);
            info!("job completed");
            let _ = self.complete_block(&block_id, result);
            return;
          }
          JobState::Failed => {
            let reason = poll.error.unwrap_or_else(|| "job failed".to_string());
            info!(reason = %reason, "job failed");
            self.fail_block(&block_id, reason);
            return;
          }
        },
        Err(e) => {
          // Transport failure mid-poll is terminal.
          error!(error = %e, "job status poll failed");
          self.fail_block(&block_id, e.to_string());
          return;
        }
      }
    }
  }
}
