//! Directed edges between block ports.

use serde::{Deserialize, Serialize};

/// Source endpoint of one connection: the predecessor block and the
/// output port the edge is drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSource {
  pub block_id: String,
  pub port: String,
}

impl ConnectionSource {
  pub fn new(block_id: impl Into<String>, port: impl Into<String>) -> Self {
    Self {
      block_id: block_id.into(),
      port: port.into(),
    }
  }
}
