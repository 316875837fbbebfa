//! Serialized pipeline definitions.
//!
//! A `PipelineDef` is the on-disk form of a workspace (blocks plus
//! connection map) that the CLI loads and saves. Loading re-validates
//! every edge against the current palette declarations.

use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::workspace::{ConnectionMap, Workspace};
use crate::Block;

/// Serialized workspace: blocks in canvas order plus the connection map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,
  #[serde(default)]
  pub blocks: Vec<Block>,
  #[serde(default)]
  pub connections: ConnectionMap,
}

impl PipelineDef {
  /// Build a workspace from this definition.
  ///
  /// # Errors
  /// Returns an error if block ids collide or any stored connection no
  /// longer validates against the palette.
  pub fn into_workspace(self) -> Result<Workspace, WorkspaceError> {
    let mut workspace = Workspace::new();
    for block in self.blocks {
      workspace.add_block(block)?;
    }
    for (target_id, targets) in self.connections {
      for (key, source) in targets {
        workspace.restore_connection(&target_id, &key, source)?;
      }
    }
    Ok(workspace)
  }

  /// Snapshot a workspace into a serializable definition.
  pub fn from_workspace(name: impl Into<String>, workspace: &Workspace) -> Self {
    Self {
      name: name.into(),
      blocks: workspace.blocks().to_vec(),
      connections: workspace.connections().clone(),
    }
  }
}
