//! Operon Engine
//!
//! This crate provides the execution engine behind the pipeline editor:
//! it resolves block inputs, dispatches jobs to the job backend, polls
//! them to completion, propagates results along the graph, and drives
//! bounded or data-driven loops over a sub-range of the pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PipelineEngine                         │
//! │  - owns the workspace (blocks + connections)                │
//! │  - run_block(id, explicit_inputs) dispatches by block role  │
//! │  - run(cancel) consumes the engine event channel            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Job trackers                          │
//! │  - one spawned task per submitted job                       │
//! │  - poll on a fixed interval until a terminal state          │
//! │  - publish BlockCompleted / BlockFailed events              │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Event dispatch                         │
//! │  - loop controller: absorb end-block completions, reset     │
//! │    the range and re-run, or finish                          │
//! │  - automation chainer: watermark record-then-drain fan-out  │
//! │    to downstream blocks                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Completion handling is serialized by the event loop: a new loop
//! iteration never starts before the previous end-block completion has
//! been fully processed. `stop_loop` is the only cancellation primitive
//! and does not cancel in-flight jobs.

mod chainer;
mod engine;
mod error;
mod events;
mod executor;
mod loops;
mod tracker;

pub use engine::{EngineConfig, PipelineEngine};
pub use error::EngineError;
pub use events::EngineEvent;
pub use executor::RunOutcome;
pub use loops::{IterationMode, LoopState};
