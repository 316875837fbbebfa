//! Automation chaining.
//!
//! When automation is enabled and a completion is not absorbed by the
//! loop controller, the completed block id is recorded as a single-slot
//! watermark, every block with an inbound connection from it is invoked
//! with its cached output as explicit input, and the watermark is
//! cleared. Record-then-drain keeps the effect at-most-once per
//! completion even though completion and chaining are observed through
//! independently-updating state.

use operon_jobs::JobService;
use tracing::{debug, info};

use crate::engine::PipelineEngine;

impl<S: JobService + 'static> PipelineEngine<S> {
  /// Record a completion in the watermark and drain it downstream.
  pub(crate) async fn chain_from(&self, block_id: &str, output: serde_json::Value) {
    self.control().watermark = Some(block_id.to_string());
    self.drain_watermark(output).await;
  }

  async fn drain_watermark(&self, output: serde_json::Value) {
    let Some(source_id) = self.control().watermark.clone() else {
      return;
    };

    let successors = self.workspace_read().successors(&source_id);
    if successors.is_empty() {
      debug!(block_id = %source_id, "no downstream blocks; end of chain");
    }

    // Back-to-back invocations; the jobs progress independently.
    let explicit = output.as_object().cloned();
    for next_id in successors {
      info!(from = %source_id, to = %next_id, "automation chaining");
      self.run_block(&next_id, explicit.clone()).await;
    }

    self.control().watermark = None;
  }
}
