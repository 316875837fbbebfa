//! The pipeline engine: shared state, UI-facing operations, and the
//! event dispatch loop.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use operon_jobs::JobService;
use operon_workspace::{
  Block, BlockStatus, ConnectionMap, Position, Workspace, WorkspaceError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::loops::LoopState;

/// Configuration for the pipeline engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Fixed interval between job status polls.
  pub poll_interval: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(5),
    }
  }
}

/// Control-plane state: automation flag, loop configuration, and the
/// chaining watermark. Guarded by one mutex; lock ordering is control
/// state before workspace, never the reverse.
#[derive(Debug, Default)]
pub(crate) struct ControlState {
  pub automation: bool,
  pub watermark: Option<String>,
  pub loop_state: LoopState,
}

/// The pipeline execution engine.
///
/// Cheap to clone; clones share the workspace, control state, and event
/// channel. The workspace and control state are the only mutable shared
/// structures and every write happens under their lock, so readers
/// always observe a consistent snapshot.
pub struct PipelineEngine<S> {
  pub(crate) workspace: Arc<RwLock<Workspace>>,
  pub(crate) jobs: Arc<S>,
  pub(crate) config: EngineConfig,
  pub(crate) control: Arc<Mutex<ControlState>>,
  events_tx: mpsc::UnboundedSender<EngineEvent>,
  events_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>>,
  pub(crate) shutdown: CancellationToken,
}

impl<S> Clone for PipelineEngine<S> {
  fn clone(&self) -> Self {
    Self {
      workspace: Arc::clone(&self.workspace),
      jobs: Arc::clone(&self.jobs),
      config: self.config.clone(),
      control: Arc::clone(&self.control),
      events_tx: self.events_tx.clone(),
      events_rx: Arc::clone(&self.events_rx),
      shutdown: self.shutdown.clone(),
    }
  }
}

impl<S: JobService + 'static> PipelineEngine<S> {
  /// Create an engine with an empty workspace and default configuration.
  pub fn new(jobs: S) -> Self {
    Self::with_config(jobs, EngineConfig::default())
  }

  /// Create an engine with an empty workspace.
  pub fn with_config(jobs: S, config: EngineConfig) -> Self {
    // Unbounded so publishers (job trackers) never block on a slow
    // dispatch loop; event volume is one per terminal block transition.
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    Self {
      workspace: Arc::new(RwLock::new(Workspace::new())),
      jobs: Arc::new(jobs),
      config,
      control: Arc::new(Mutex::new(ControlState::default())),
      events_tx,
      events_rx: Arc::new(Mutex::new(Some(events_rx))),
      shutdown: CancellationToken::new(),
    }
  }

  /// Replace the workspace wholesale, e.g. after loading a pipeline
  /// definition.
  pub fn replace_workspace(&self, workspace: Workspace) {
    *self.workspace_write() = workspace;
  }

  // ---- store facade -------------------------------------------------

  /// Add a block to the workspace.
  pub fn add_block(&self, block: Block) -> Result<(), EngineError> {
    self.workspace_write().add_block(block)?;
    Ok(())
  }

  /// Merge parameters into a block's configuration.
  pub fn update_block_parameters(
    &self,
    block_id: &str,
    parameters: serde_json::Map<String, serde_json::Value>,
  ) -> Result<(), EngineError> {
    self.workspace_write().update_parameters(block_id, parameters)?;
    Ok(())
  }

  /// Move a block on the canvas.
  pub fn move_block(&self, block_id: &str, position: Position) -> Result<(), EngineError> {
    self.workspace_write().set_position(block_id, position)?;
    Ok(())
  }

  /// Delete a block and every connection referencing it.
  pub fn delete_block(&self, block_id: &str) -> Result<(), EngineError> {
    self.workspace_write().delete_block(block_id)?;
    Ok(())
  }

  /// Connect a source output port to a target input port.
  pub fn connect(
    &self,
    source_id: &str,
    source_port: &str,
    target_id: &str,
    target_port: &str,
  ) -> Result<(), EngineError> {
    self
      .workspace_write()
      .connect(source_id, source_port, target_id, target_port)?;
    Ok(())
  }

  /// Remove the connection on one target port.
  pub fn disconnect(&self, target_id: &str, target_port: &str) {
    self.workspace_write().disconnect(target_id, target_port);
  }

  // ---- read-only snapshots ------------------------------------------

  /// Snapshot of all blocks in insertion order.
  pub fn blocks(&self) -> Vec<Block> {
    self.workspace_read().blocks().to_vec()
  }

  /// Snapshot of the connection map.
  pub fn connections(&self) -> ConnectionMap {
    self.workspace_read().connections().clone()
  }

  /// Current status of a block.
  pub fn block_status(&self, block_id: &str) -> Option<BlockStatus> {
    self.workspace_read().status(block_id)
  }

  /// Cached output of a block.
  pub fn block_output(&self, block_id: &str) -> Option<serde_json::Value> {
    self.workspace_read().output(block_id).cloned()
  }

  /// Snapshot of the whole workspace.
  pub fn workspace_snapshot(&self) -> Workspace {
    self.workspace_read().clone()
  }

  // ---- automation ---------------------------------------------------

  /// Enable or disable automation chaining.
  pub fn set_automation(&self, enabled: bool) {
    info!(enabled, "automation toggled");
    self.control().automation = enabled;
  }

  /// Whether automation chaining is enabled.
  pub fn automation(&self) -> bool {
    self.control().automation
  }

  /// The pending chaining watermark, if any.
  pub fn watermark(&self) -> Option<String> {
    self.control().watermark.clone()
  }

  // ---- event dispatch -----------------------------------------------

  /// Run the event dispatch loop until cancelled.
  ///
  /// Consumes completion and failure events one at a time: completions
  /// feed the loop controller and then, unless absorbed, the automation
  /// chainer; failures may halt an active loop.
  pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
    let mut receiver = self
      .events_rx
      .lock()
      .expect("event receiver lock poisoned")
      .take()
      .ok_or(EngineError::AlreadyRunning)?;

    info!("starting pipeline event loop");
    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("pipeline event loop cancelled");
          break;
        }
        _ = self.shutdown.cancelled() => {
          info!("pipeline engine shut down");
          break;
        }
        event = receiver.recv() => match event {
          Some(event) => self.on_event(event).await,
          None => break,
        }
      }
    }

    // Hand the receiver back so the loop can be restarted.
    *self
      .events_rx
      .lock()
      .expect("event receiver lock poisoned") = Some(receiver);
    Ok(())
  }

  /// Stop trackers and the event loop.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }

  async fn on_event(&self, event: EngineEvent) {
    match event {
      EngineEvent::BlockCompleted { block_id, output } => {
        debug!(block_id = %block_id, "block completed");
        let absorbed = self.handle_loop_completion(&block_id).await;
        if absorbed {
          return;
        }
        if self.automation() {
          self.chain_from(&block_id, output).await;
        }
      }
      EngineEvent::BlockFailed { block_id, error } => {
        debug!(block_id = %block_id, error = %error, "block failed");
        self.halt_loop_on_failure(&block_id, &error);
      }
    }
  }

  // ---- shared-state plumbing ----------------------------------------

  pub(crate) fn workspace_read(&self) -> RwLockReadGuard<'_, Workspace> {
    self.workspace.read().expect("workspace lock poisoned")
  }

  pub(crate) fn workspace_write(&self) -> RwLockWriteGuard<'_, Workspace> {
    self.workspace.write().expect("workspace lock poisoned")
  }

  pub(crate) fn control(&self) -> MutexGuard<'_, ControlState> {
    self.control.lock().expect("control state lock poisoned")
  }

  /// Publish an engine event; best-effort if the loop is gone.
  pub(crate) fn publish(&self, event: EngineEvent) {
    let _ = self.events_tx.send(event);
  }

  /// Record a block's result and publish its completion.
  pub(crate) fn complete_block(
    &self,
    block_id: &str,
    output: serde_json::Value,
  ) -> Result<(), WorkspaceError> {
    {
      let mut workspace = self.workspace_write();
      workspace.set_output(block_id, Some(output.clone()))?;
      workspace.set_status(block_id, BlockStatus::Completed)?;
    }
    self.publish(EngineEvent::BlockCompleted {
      block_id: block_id.to_string(),
      output,
    });
    Ok(())
  }

  /// Mark a block failed and publish the failure.
  pub(crate) fn fail_block(&self, block_id: &str, error: impl Into<String>) {
    if self
      .workspace_write()
      .set_status(block_id, BlockStatus::Failed)
      .is_err()
    {
      // Block was deleted mid-flight; nothing to report.
      return;
    }
    self.publish(EngineEvent::BlockFailed {
      block_id: block_id.to_string(),
      error: error.into(),
    });
  }
}
