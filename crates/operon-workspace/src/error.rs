use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("block not found: {0}")]
  BlockNotFound(String),

  #[error("block already exists: {0}")]
  DuplicateBlock(String),

  #[error("connection endpoints must be distinct blocks: {0}")]
  SelfConnection(String),

  #[error("block '{block_id}' does not declare port '{port}'")]
  UnknownPort { block_id: String, port: String },

  #[error("incompatible ports: '{source_port}' cannot feed '{target_port}'")]
  IncompatiblePorts {
    source_port: String,
    target_port: String,
  },
}
