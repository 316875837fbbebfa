//! Block execution.
//!
//! `run_block` is the engine's central operation: it gathers a block's
//! effective inputs, special-cases the two control blocks (sequence
//! iterator and fan-in aggregator), and otherwise submits a job to the
//! backend and starts tracking it.

use operon_jobs::{BundleItem, JobDescriptor, JobService};
use operon_workspace::{BlockKind, BlockRole, BlockStatus};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::engine::PipelineEngine;

/// What one `run_block` invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  /// A job was submitted and is being tracked.
  Submitted,
  /// A control block finished immediately.
  Completed,
  /// The block transitioned to `Failed` without a tracked job.
  Failed,
  /// The aggregator is still waiting on incomplete predecessors; its
  /// status is untouched.
  Deferred,
  /// The block id is unknown; nothing happened.
  Skipped,
}

impl<S: JobService + 'static> PipelineEngine<S> {
  /// Run one block.
  ///
  /// `explicit_inputs` overrides input resolution; when absent, inputs
  /// are derived from predecessor outputs along inbound connections.
  #[instrument(name = "run_block", skip(self, explicit_inputs), fields(block_id = %block_id))]
  pub async fn run_block(
    &self,
    block_id: &str,
    explicit_inputs: Option<serde_json::Map<String, serde_json::Value>>,
  ) -> RunOutcome {
    let kind = match self.workspace_read().get(block_id) {
      Some(block) => block.kind,
      None => {
        warn!("run requested for unknown block");
        return RunOutcome::Skipped;
      }
    };

    match kind.role() {
      BlockRole::Iterator => self.run_iterator(block_id),
      BlockRole::Aggregator => self.run_aggregator(block_id).await,
      BlockRole::Compute => self.run_compute(block_id, kind, explicit_inputs).await,
    }
  }

  /// Pop one element from the iterator's pending sequence list and
  /// complete immediately. No job is created.
  fn run_iterator(&self, block_id: &str) -> RunOutcome {
    let output = {
      let mut workspace = self.workspace_write();
      if workspace.set_output(block_id, None).is_err() {
        return RunOutcome::Skipped;
      }
      let _ = workspace.set_status(block_id, BlockStatus::Running);
      let Some(block) = workspace.get(block_id) else {
        return RunOutcome::Skipped;
      };

      let sequences: Vec<serde_json::Value> = block
        .parameters
        .get("sequences")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
      if sequences.is_empty() {
        drop(workspace);
        warn!("sequence iterator has no pending sequences");
        self.fail_block(block_id, "no sequences to iterate");
        return RunOutcome::Failed;
      }

      let index = block
        .parameters
        .get("current_index")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
      let index = index.min(sequences.len() - 1);

      let completed_before = block
        .parameters
        .get("completed_sequences")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
      let total = block
        .parameters
        .get("total_sequences")
        .and_then(|v| v.as_u64())
        .unwrap_or(completed_before + sequences.len() as u64);

      let element = sequences[index].clone();
      let mut remaining = sequences;
      remaining.remove(index);
      let remaining_count = remaining.len();

      let mut updates = serde_json::Map::new();
      updates.insert("sequences".to_string(), serde_json::Value::Array(remaining));
      updates.insert("current_index".to_string(), json!(0));
      updates.insert("total_sequences".to_string(), json!(total));
      updates.insert("completed_sequences".to_string(), json!(completed_before + 1));
      workspace
        .update_parameters(block_id, updates)
        .expect("iterator block disappeared under write lock");

      json!({
        "sequence": element,
        "info": format!("Sequence {} of {}", index + 1, remaining_count + 1),
        "sequence_name": format!("sequence_{}", index + 1),
        "progress": {
          "completed": completed_before + 1,
          "total": total,
          "remaining": remaining_count,
        },
      })
    };

    info!(
      remaining = output["progress"]["remaining"].as_u64().unwrap_or(0),
      "sequence iterator advanced"
    );
    match self.complete_block(block_id, output) {
      Ok(()) => RunOutcome::Completed,
      Err(_) => RunOutcome::Skipped,
    }
  }

  /// Fan-in aggregator: defer until every predecessor completed, then
  /// submit one combined bundling call.
  async fn run_aggregator(&self, block_id: &str) -> RunOutcome {
    // Readiness is checked before any status mutation so that an early
    // invocation leaves the block exactly as it was.
    let items = {
      let workspace = self.workspace_read();
      let inbound = workspace.inbound(block_id).cloned().unwrap_or_default();

      let mut items = Vec::with_capacity(inbound.len());
      for source in inbound.values() {
        if workspace.status(&source.block_id) != Some(BlockStatus::Completed) {
          info!(pending = %source.block_id, "aggregator waiting on incomplete input");
          return RunOutcome::Deferred;
        }
        items.push(BundleItem {
          output_type: source.port.clone(),
          data: workspace
            .output(&source.block_id)
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        });
      }
      items
    };

    {
      let mut workspace = self.workspace_write();
      if workspace.set_output(block_id, None).is_err() {
        return RunOutcome::Skipped;
      }
      let _ = workspace.set_status(block_id, BlockStatus::Running);
    }

    info!(item_count = items.len(), "submitting combined download");
    match self.jobs.bundle(&items).await {
      Ok(result) => {
        let output = json!({ "download_url": result.download_url });
        match self.complete_block(block_id, output) {
          Ok(()) => RunOutcome::Completed,
          Err(_) => RunOutcome::Skipped,
        }
      }
      Err(e) => {
        error!(error = %e, "combined download failed");
        self.fail_block(block_id, e.to_string());
        RunOutcome::Failed
      }
    }
  }

  /// Ordinary compute block: resolve inputs, submit and confirm a job,
  /// then attach a tracker.
  async fn run_compute(
    &self,
    block_id: &str,
    kind: BlockKind,
    explicit_inputs: Option<serde_json::Map<String, serde_json::Value>>,
  ) -> RunOutcome {
    let parameters = {
      let mut workspace = self.workspace_write();
      match workspace.status(block_id) {
        None => return RunOutcome::Skipped,
        Some(BlockStatus::Running) => {
          // Another tracker already owns this block.
          warn!("block already running; ignoring re-run");
          return RunOutcome::Skipped;
        }
        Some(_) => {}
      }
      let _ = workspace.set_output(block_id, None);
      let _ = workspace.set_status(block_id, BlockStatus::Running);
      workspace
        .get(block_id)
        .map(|b| b.parameters.clone())
        .unwrap_or_default()
    };

    let inputs = match explicit_inputs {
      Some(inputs) => inputs,
      None => self.resolve_inputs(block_id),
    };

    // Block inputs override configured parameters on key collision.
    let mut payload = parameters;
    for (key, value) in inputs {
      payload.insert(key, value);
    }

    let descriptor = JobDescriptor::new(
      kind.job_type(),
      Some(kind.description()),
      payload.clone(),
      block_id,
    );

    let submission = match self.jobs.submit(kind.job_type(), payload).await {
      Ok(submission) => submission,
      Err(e) => {
        error!(error = %e, "job submission failed");
        self.fail_block(block_id, e.to_string());
        return RunOutcome::Failed;
      }
    };

    match self.jobs.confirm(&submission.job_id, &descriptor).await {
      Ok(confirmation) if confirmation.success => {
        info!(job_id = %submission.job_id, "job confirmed, tracking");
        self.spawn_tracker(submission.job_id, block_id.to_string());
        RunOutcome::Submitted
      }
      Ok(confirmation) => {
        let message = confirmation
          .message
          .unwrap_or_else(|| "confirmation rejected".to_string());
        warn!(job_id = %submission.job_id, message = %message, "job confirmation rejected");
        self.fail_block(block_id, message);
        RunOutcome::Failed
      }
      Err(e) => {
        error!(error = %e, "job confirmation failed");
        self.fail_block(block_id, e.to_string());
        RunOutcome::Failed
      }
    }
  }

  /// Derive a block's inputs from predecessor outputs: each inbound
  /// connection contributes the field matching its source port, and
  /// unrecognized ports pass the whole predecessor output through under
  /// the target port name.
  fn resolve_inputs(&self, block_id: &str) -> serde_json::Map<String, serde_json::Value> {
    let workspace = self.workspace_read();
    let mut inputs = serde_json::Map::new();

    let Some(inbound) = workspace.inbound(block_id) else {
      return inputs;
    };
    for (target_port, source) in inbound {
      let Some(output) = workspace.output(&source.block_id) else {
        continue;
      };
      let extracted = match source.port.as_str() {
        "sequence" => output.get("sequence").map(|v| ("sequence", v.clone())),
        "structure" => output.get("pdb_file").map(|v| ("pdb_file", v.clone())),
        "metrics" => output.get("metrics").map(|v| ("metrics", v.clone())),
        "results" => output.get("results").map(|v| ("results", v.clone())),
        _ => Some((target_port.as_str(), output.clone())),
      };
      if let Some((key, value)) = extracted {
        inputs.insert(key.to_string(), value);
      }
    }
    inputs
  }
}
