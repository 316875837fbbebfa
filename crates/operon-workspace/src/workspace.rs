//! The workspace store: owned block set plus connection map.
//!
//! Block insertion order is meaningful: the loop controller ranges over
//! blocks by position in this ordering, not by graph reachability.

use std::collections::HashMap;

use crate::block::{Block, BlockStatus};
use crate::connection::ConnectionSource;
use crate::error::WorkspaceError;
use crate::validator;

/// Connection map keyed `target block id -> target port -> source`.
pub type ConnectionMap = HashMap<String, HashMap<String, ConnectionSource>>;

/// Owned block graph for one pipeline session.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
  blocks: Vec<Block>,
  connections: ConnectionMap,
  /// Monotonic counter for synthesized aggregator fan-in keys.
  fan_in_seq: u64,
}

impl Workspace {
  pub fn new() -> Self {
    Self::default()
  }

  /// All blocks in insertion order.
  pub fn blocks(&self) -> &[Block] {
    &self.blocks
  }

  /// The full connection map.
  pub fn connections(&self) -> &ConnectionMap {
    &self.connections
  }

  /// Look up a block by id.
  pub fn get(&self, block_id: &str) -> Option<&Block> {
    self.blocks.iter().find(|b| b.id == block_id)
  }

  fn get_mut(&mut self, block_id: &str) -> Result<&mut Block, WorkspaceError> {
    self
      .blocks
      .iter_mut()
      .find(|b| b.id == block_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(block_id.to_string()))
  }

  /// Position of a block in the insertion ordering.
  pub fn position_of(&self, block_id: &str) -> Option<usize> {
    self.blocks.iter().position(|b| b.id == block_id)
  }

  /// Current status of a block, if it exists.
  pub fn status(&self, block_id: &str) -> Option<BlockStatus> {
    self.get(block_id).map(|b| b.status)
  }

  /// Cached output of a block, if any.
  pub fn output(&self, block_id: &str) -> Option<&serde_json::Value> {
    self.get(block_id).and_then(|b| b.output.as_ref())
  }

  /// Add a block. Rejects a duplicate id with no state change.
  pub fn add_block(&mut self, block: Block) -> Result<(), WorkspaceError> {
    if self.get(&block.id).is_some() {
      return Err(WorkspaceError::DuplicateBlock(block.id));
    }
    self.blocks.push(block);
    Ok(())
  }

  /// Remove a block and every connection referencing it as source or
  /// target.
  pub fn delete_block(&mut self, block_id: &str) -> Result<(), WorkspaceError> {
    if self.get(block_id).is_none() {
      return Err(WorkspaceError::BlockNotFound(block_id.to_string()));
    }
    self.blocks.retain(|b| b.id != block_id);
    self.connections.remove(block_id);
    for targets in self.connections.values_mut() {
      targets.retain(|_, source| source.block_id != block_id);
    }
    self.connections.retain(|_, targets| !targets.is_empty());
    Ok(())
  }

  /// Merge parameters into a block's parameter map.
  pub fn update_parameters(
    &mut self,
    block_id: &str,
    parameters: serde_json::Map<String, serde_json::Value>,
  ) -> Result<(), WorkspaceError> {
    let block = self.get_mut(block_id)?;
    for (key, value) in parameters {
      block.parameters.insert(key, value);
    }
    Ok(())
  }

  /// Replace a block's parameter map wholesale.
  pub fn set_parameters(
    &mut self,
    block_id: &str,
    parameters: serde_json::Map<String, serde_json::Value>,
  ) -> Result<(), WorkspaceError> {
    self.get_mut(block_id)?.parameters = parameters;
    Ok(())
  }

  pub fn set_status(
    &mut self,
    block_id: &str,
    status: BlockStatus,
  ) -> Result<(), WorkspaceError> {
    self.get_mut(block_id)?.status = status;
    Ok(())
  }

  pub fn set_output(
    &mut self,
    block_id: &str,
    output: Option<serde_json::Value>,
  ) -> Result<(), WorkspaceError> {
    self.get_mut(block_id)?.output = output;
    Ok(())
  }

  /// Move a block on the canvas.
  pub fn set_position(
    &mut self,
    block_id: &str,
    position: crate::block::Position,
  ) -> Result<(), WorkspaceError> {
    self.get_mut(block_id)?.position = position;
    Ok(())
  }

  /// Resize a block on the canvas.
  pub fn set_size(
    &mut self,
    block_id: &str,
    width: f64,
    height: f64,
  ) -> Result<(), WorkspaceError> {
    let block = self.get_mut(block_id)?;
    block.width = Some(width);
    block.height = Some(height);
    Ok(())
  }

  /// Connect a source output port to a target input port.
  ///
  /// For aggregator targets a fresh fan-in key is synthesized so that
  /// multiple sources coexist on the same logical input. For all other
  /// targets an already-connected `(target, port)` key makes this a
  /// silent no-op.
  ///
  /// # Errors
  /// Returns an error if either endpoint is missing, the endpoints are
  /// the same block, or the port pair is invalid; nothing is mutated.
  pub fn connect(
    &mut self,
    source_id: &str,
    source_port: &str,
    target_id: &str,
    target_port: &str,
  ) -> Result<(), WorkspaceError> {
    if source_id == target_id {
      return Err(WorkspaceError::SelfConnection(source_id.to_string()));
    }
    let source = self
      .get(source_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(source_id.to_string()))?;
    let target = self
      .get(target_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(target_id.to_string()))?;

    validator::validate_edge(source, source_port, target, target_port)?;
    let aggregator = target.kind.is_aggregator();

    let key = if aggregator {
      self.next_fan_in_key(target_id, target_port)
    } else {
      target_port.to_string()
    };

    let targets = self.connections.entry(target_id.to_string()).or_default();
    if targets.contains_key(&key) {
      // One source per (target, port); keep the existing edge.
      return Ok(());
    }
    targets.insert(key, ConnectionSource::new(source_id, source_port));
    Ok(())
  }

  /// Remove the connection on one target port, if present.
  pub fn disconnect(&mut self, target_id: &str, target_port: &str) {
    if let Some(targets) = self.connections.get_mut(target_id) {
      targets.remove(target_port);
      if targets.is_empty() {
        self.connections.remove(target_id);
      }
    }
  }

  /// Inbound connections of one target block, keyed by target port.
  pub fn inbound(&self, target_id: &str) -> Option<&HashMap<String, ConnectionSource>> {
    self.connections.get(target_id)
  }

  /// Ids of every block with an inbound connection sourced from
  /// `source_id`, in insertion order.
  pub fn successors(&self, source_id: &str) -> Vec<String> {
    self
      .blocks
      .iter()
      .filter(|b| {
        self
          .connections
          .get(&b.id)
          .is_some_and(|targets| targets.values().any(|s| s.block_id == source_id))
      })
      .map(|b| b.id.clone())
      .collect()
  }

  /// Reset every block in the positional inclusive range spanned by the
  /// two ids to idle, clearing cached outputs. Parameters survive.
  pub fn reset_range(&mut self, start_id: &str, end_id: &str) -> Result<(), WorkspaceError> {
    let start = self
      .position_of(start_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(start_id.to_string()))?;
    let end = self
      .position_of(end_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(end_id.to_string()))?;

    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
    for block in &mut self.blocks[lo..=hi] {
      block.status = BlockStatus::Idle;
      block.output = None;
    }
    Ok(())
  }

  /// Synthesize an unused fan-in key for an aggregator target port.
  fn next_fan_in_key(&mut self, target_id: &str, target_port: &str) -> String {
    loop {
      let key = format!("{}_{}", target_port, self.fan_in_seq);
      self.fan_in_seq += 1;
      if !self
        .connections
        .get(target_id)
        .is_some_and(|targets| targets.contains_key(&key))
      {
        return key;
      }
    }
  }

  /// Restore a connection under an already-synthesized key. Used when
  /// loading a serialized pipeline; validates endpoints but keeps the
  /// stored key.
  pub(crate) fn restore_connection(
    &mut self,
    target_id: &str,
    key: &str,
    source: ConnectionSource,
  ) -> Result<(), WorkspaceError> {
    if source.block_id == target_id {
      return Err(WorkspaceError::SelfConnection(target_id.to_string()));
    }
    let source_block = self
      .get(&source.block_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(source.block_id.clone()))?;
    let target_block = self
      .get(target_id)
      .ok_or_else(|| WorkspaceError::BlockNotFound(target_id.to_string()))?;

    let target_port = if target_block.kind.is_aggregator() {
      // Stored aggregator keys are synthesized; validate as fan-in.
      crate::block::WILDCARD_PORT
    } else {
      key
    };
    validator::validate_edge(source_block, &source.port, target_block, target_port)?;

    self
      .connections
      .entry(target_id.to_string())
      .or_default()
      .insert(key.to_string(), source);
    Ok(())
  }
}
