//! Connection validation.
//!
//! A candidate edge is checked against both endpoint port declarations
//! before the store is touched; invalid edges produce an error and no
//! mutation.

use crate::block::{Block, WILDCARD_PORT};
use crate::error::WorkspaceError;

/// Returns true if `port` is covered by a kind's declaration list.
///
/// A declared `"*"` matches any concrete name, and a requested `"*"`
/// matches any declaration.
fn declares(declared: &[&str], port: &str) -> bool {
  port == WILDCARD_PORT
    || declared
      .iter()
      .any(|p| *p == port || *p == WILDCARD_PORT)
}

/// Validate a candidate edge between two blocks.
///
/// The edge is valid if the target kind is the aggregator (any source,
/// any input port, creating a new fan-in slot), or the port names match,
/// or either port name is the wildcard.
pub fn validate_edge(
  source: &Block,
  source_port: &str,
  target: &Block,
  target_port: &str,
) -> Result<(), WorkspaceError> {
  if !declares(source.kind.outputs(), source_port) {
    return Err(WorkspaceError::UnknownPort {
      block_id: source.id.clone(),
      port: source_port.to_string(),
    });
  }

  if target.kind.is_aggregator() {
    return Ok(());
  }

  if !declares(target.kind.inputs(), target_port) {
    return Err(WorkspaceError::UnknownPort {
      block_id: target.id.clone(),
      port: target_port.to_string(),
    });
  }

  if source_port == target_port || source_port == WILDCARD_PORT || target_port == WILDCARD_PORT {
    return Ok(());
  }

  Err(WorkspaceError::IncompatiblePorts {
    source_port: source_port.to_string(),
    target_port: target_port.to_string(),
  })
}
