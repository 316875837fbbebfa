//! Engine events.
//!
//! Every terminal block transition publishes one event on the engine's
//! internal channel. The dispatch loop consumes each event exactly once:
//! completions feed the loop controller and the automation chainer,
//! failures only the loop controller. This replaces the original UI's
//! reactivity effect on a "last completed block" cell with an explicit
//! message.

use serde::{Deserialize, Serialize};

/// Events published when a block reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
  /// A block completed; `output` is its cached result payload.
  BlockCompleted {
    block_id: String,
    output: serde_json::Value,
  },

  /// A block failed. Failures raise no completion and are never chained.
  BlockFailed { block_id: String, error: String },
}
