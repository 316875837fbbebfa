//! The loop controller.
//!
//! Repeats execution of the positional inclusive block range
//! `[start, end]` either a fixed number of times or until a driving
//! sequence iterator is exhausted, resetting intermediate state between
//! iterations. The range is positional over the current block ordering,
//! not a graph reachability computation.

use operon_jobs::JobService;
use operon_workspace::BlockRole;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::PipelineEngine;
use crate::error::EngineError;

/// What drives loop continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IterationMode {
  /// Re-run the range until `target` iterations have completed.
  Count { target: u32 },
  /// Re-run the range while the named sequence iterator still has
  /// pending sequences.
  Sequence { block_id: String },
}

impl Default for IterationMode {
  fn default() -> Self {
    IterationMode::Count { target: 1 }
  }
}

/// Loop configuration and progress. One per engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopState {
  pub enabled: bool,
  pub start_block_id: Option<String>,
  pub end_block_id: Option<String>,
  pub mode: IterationMode,
  pub current_iteration: u32,
  /// Single-slot guard preventing re-entrant scheduling of the next
  /// start while one is already pending.
  #[serde(skip)]
  pub(crate) iteration_queued: bool,
}

enum LoopDecision {
  /// The completion belongs to the loop; re-run the range.
  Continue { start: String, end: String },
  /// The completion belongs to the loop but a re-run is already queued.
  AlreadyQueued,
  /// The loop just finished; let ordinary chaining take over.
  Finished,
  /// Not a loop completion at all.
  Unrelated,
}

impl<S: JobService + 'static> PipelineEngine<S> {
  /// Select the loop's start block.
  pub fn set_loop_start(&self, block_id: Option<String>) {
    self.control().loop_state.start_block_id = block_id;
  }

  /// Select the loop's end block.
  pub fn set_loop_end(&self, block_id: Option<String>) {
    self.control().loop_state.end_block_id = block_id;
  }

  /// Choose count-driven or sequence-driven iteration.
  pub fn set_iteration_mode(&self, mode: IterationMode) {
    self.control().loop_state.mode = mode;
  }

  /// Snapshot of the loop configuration and progress.
  pub fn loop_state(&self) -> LoopState {
    self.control().loop_state.clone()
  }

  /// Start the configured loop and run its start block.
  ///
  /// # Errors
  /// Rejected with no state change unless both range blocks are set and
  /// present, and the iteration mode is satisfiable (count of at least
  /// one, or an existing sequence-iterator block).
  pub async fn start_loop(&self) -> Result<(), EngineError> {
    let start_id = {
      let mut control = self.control();
      let state = &control.loop_state;

      let start = state
        .start_block_id
        .clone()
        .ok_or_else(|| EngineError::LoopPrecondition("no start block selected".to_string()))?;
      let end = state
        .end_block_id
        .clone()
        .ok_or_else(|| EngineError::LoopPrecondition("no end block selected".to_string()))?;

      {
        let workspace = self.workspace_read();
        if workspace.get(&start).is_none() {
          return Err(EngineError::LoopPrecondition(format!(
            "start block '{}' no longer exists",
            start
          )));
        }
        if workspace.get(&end).is_none() {
          return Err(EngineError::LoopPrecondition(format!(
            "end block '{}' no longer exists",
            end
          )));
        }
        match &state.mode {
          IterationMode::Count { target } if *target == 0 => {
            return Err(EngineError::LoopPrecondition(
              "iteration count must be at least 1".to_string(),
            ));
          }
          IterationMode::Count { .. } => {}
          IterationMode::Sequence { block_id } => {
            let driving = workspace.get(block_id).ok_or_else(|| {
              EngineError::LoopPrecondition(format!(
                "sequence block '{}' no longer exists",
                block_id
              ))
            })?;
            if driving.kind.role() != BlockRole::Iterator {
              return Err(EngineError::LoopPrecondition(format!(
                "block '{}' is not a sequence iterator",
                block_id
              )));
            }
          }
        }
      }

      let state = &mut control.loop_state;
      state.enabled = true;
      state.current_iteration = 0;
      state.iteration_queued = false;
      info!(start = %start, end = %state.end_block_id.as_deref().unwrap_or(""), "loop started");
      start
    };

    self.run_block(&start_id, None).await;
    Ok(())
  }

  /// Disable the loop and reset the range so no stale partial iteration
  /// remains. Idempotent; does not cancel in-flight jobs.
  pub fn stop_loop(&self) {
    let range = {
      let mut control = self.control();
      let state = &mut control.loop_state;
      state.enabled = false;
      state.current_iteration = 0;
      state.iteration_queued = false;
      state
        .start_block_id
        .clone()
        .zip(state.end_block_id.clone())
    };
    if let Some((start, end)) = range {
      let _ = self.workspace_write().reset_range(&start, &end);
    }
    info!("loop stopped");
  }

  /// Loop-controller half of completion handling. Returns true when the
  /// completion was absorbed by the loop (a re-run was scheduled or was
  /// already pending) so chaining must not see it.
  pub(crate) async fn handle_loop_completion(&self, block_id: &str) -> bool {
    let decision = {
      let mut control = self.control();
      let state = &mut control.loop_state;

      if !state.enabled || state.end_block_id.as_deref() != Some(block_id) {
        LoopDecision::Unrelated
      } else if state.iteration_queued {
        LoopDecision::AlreadyQueued
      } else {
        state.current_iteration += 1;
        let proceed = match &state.mode {
          IterationMode::Count { target } => state.current_iteration < *target,
          IterationMode::Sequence { block_id } => self.pending_sequences(block_id) > 0,
        };
        if proceed {
          state.iteration_queued = true;
          LoopDecision::Continue {
            start: state.start_block_id.clone().expect("loop enabled without start"),
            end: state.end_block_id.clone().expect("loop enabled without end"),
          }
        } else {
          state.enabled = false;
          LoopDecision::Finished
        }
      }
    };

    match decision {
      LoopDecision::Continue { start, end } => {
        let iteration = self.control().loop_state.current_iteration;
        info!(iteration, "loop continuing");
        let _ = self.workspace_write().reset_range(&start, &end);
        self.run_block(&start, None).await;
        self.control().loop_state.iteration_queued = false;
        true
      }
      LoopDecision::AlreadyQueued => true,
      LoopDecision::Finished => {
        info!("loop finished");
        false
      }
      LoopDecision::Unrelated => false,
    }
  }

  /// Halt an enabled loop when a block inside its positional range
  /// fails, so a broken range is not re-iterated.
  pub(crate) fn halt_loop_on_failure(&self, block_id: &str, error: &str) {
    let mut control = self.control();
    let state = &mut control.loop_state;
    if !state.enabled {
      return;
    }
    let (Some(start), Some(end)) = (&state.start_block_id, &state.end_block_id) else {
      return;
    };

    let in_range = {
      let workspace = self.workspace_read();
      match (
        workspace.position_of(start),
        workspace.position_of(end),
        workspace.position_of(block_id),
      ) {
        (Some(s), Some(e), Some(p)) => {
          let (lo, hi) = if s <= e { (s, e) } else { (e, s) };
          p >= lo && p <= hi
        }
        _ => false,
      }
    };

    if in_range {
      warn!(block_id = %block_id, error = %error, "halting loop after failure inside range");
      state.enabled = false;
      state.iteration_queued = false;
    }
  }

  /// Remaining queued sequences on a sequence-iterator block.
  fn pending_sequences(&self, block_id: &str) -> usize {
    self
      .workspace_read()
      .get(block_id)
      .and_then(|b| b.parameters.get("sequences"))
      .and_then(|v| v.as_array())
      .map(|seqs| seqs.len())
      .unwrap_or(0)
  }
}
