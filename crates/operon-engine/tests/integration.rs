//! Integration tests for operon-engine using a programmable in-memory
//! job backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use operon_engine::{EngineConfig, IterationMode, PipelineEngine, RunOutcome};
use operon_jobs::{
  BundleItem, BundleResult, ConfirmedJob, JobConfirmation, JobDescriptor, JobError, JobPoll,
  JobService, JobState, JobSubmission,
};
use operon_workspace::{Block, BlockKind, BlockStatus};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Observable state of the mock backend, shared with the test body.
#[derive(Default)]
struct MockState {
  submits: Mutex<Vec<(String, serde_json::Map<String, serde_json::Value>)>>,
  results: Mutex<HashMap<String, serde_json::Value>>,
  fail_submit: Mutex<HashSet<String>>,
  fail_poll: Mutex<HashSet<String>>,
  job_types: Mutex<HashMap<String, String>>,
  bundles: Mutex<Vec<Vec<BundleItem>>>,
  counter: AtomicU64,
}

impl MockState {
  fn submit_count(&self, job_type: &str) -> usize {
    self
      .submits
      .lock()
      .unwrap()
      .iter()
      .filter(|(t, _)| t == job_type)
      .count()
  }

  fn submitted_payloads(&self, job_type: &str) -> Vec<serde_json::Map<String, serde_json::Value>> {
    self
      .submits
      .lock()
      .unwrap()
      .iter()
      .filter(|(t, _)| t == job_type)
      .map(|(_, p)| p.clone())
      .collect()
  }
}

/// Job backend that completes every job on its first poll.
#[derive(Clone, Default)]
struct MockJobService {
  state: Arc<MockState>,
}

impl MockJobService {
  fn new() -> (Self, Arc<MockState>) {
    let service = Self::default();
    let state = Arc::clone(&service.state);
    (service, state)
  }

  fn with_result(self, job_type: &str, result: serde_json::Value) -> Self {
    self
      .state
      .results
      .lock()
      .unwrap()
      .insert(job_type.to_string(), result);
    self
  }

  fn failing_submit(self, job_type: &str) -> Self {
    self
      .state
      .fail_submit
      .lock()
      .unwrap()
      .insert(job_type.to_string());
    self
  }

  fn failing_poll(self, job_type: &str) -> Self {
    self
      .state
      .fail_poll
      .lock()
      .unwrap()
      .insert(job_type.to_string());
    self
  }
}

#[async_trait]
impl JobService for MockJobService {
  async fn submit(
    &self,
    job_type: &str,
    payload: serde_json::Map<String, serde_json::Value>,
  ) -> Result<JobSubmission, JobError> {
    if self.state.fail_submit.lock().unwrap().contains(job_type) {
      return Err(JobError::InvalidResponse("submit refused".to_string()));
    }
    self
      .state
      .submits
      .lock()
      .unwrap()
      .push((job_type.to_string(), payload));
    let job_id = format!("job-{}", self.state.counter.fetch_add(1, Ordering::SeqCst));
    self
      .state
      .job_types
      .lock()
      .unwrap()
      .insert(job_id.clone(), job_type.to_string());
    Ok(JobSubmission { job_id })
  }

  async fn confirm(
    &self,
    _job_id: &str,
    descriptor: &JobDescriptor,
  ) -> Result<JobConfirmation, JobError> {
    Ok(JobConfirmation {
      success: true,
      job: Some(ConfirmedJob {
        block_id: descriptor.block_id.clone(),
      }),
      message: None,
    })
  }

  async fn poll(&self, job_id: &str) -> Result<JobPoll, JobError> {
    let job_type = self
      .state
      .job_types
      .lock()
      .unwrap()
      .get(job_id)
      .cloned()
      .ok_or_else(|| JobError::InvalidResponse(format!("unknown job '{}'", job_id)))?;

    if self.state.fail_poll.lock().unwrap().contains(&job_type) {
      return Ok(JobPoll {
        status: JobState::Failed,
        result: None,
        error: Some("backend exploded".to_string()),
      });
    }

    let result = self
      .state
      .results
      .lock()
      .unwrap()
      .get(&job_type)
      .cloned()
      .unwrap_or_else(|| json!({}));
    Ok(JobPoll {
      status: JobState::Completed,
      result: Some(result),
      error: None,
    })
  }

  async fn bundle(&self, items: &[BundleItem]) -> Result<BundleResult, JobError> {
    self.state.bundles.lock().unwrap().push(items.to_vec());
    Ok(BundleResult {
      download_url: "http://localhost:5000/files/bundle.zip".to_string(),
    })
  }
}

fn test_engine(service: MockJobService) -> PipelineEngine<MockJobService> {
  PipelineEngine::with_config(
    service,
    EngineConfig {
      poll_interval: Duration::from_millis(10),
    },
  )
}

fn spawn_dispatch(engine: &PipelineEngine<MockJobService>) -> CancellationToken {
  let cancel = CancellationToken::new();
  let runner = engine.clone();
  let token = cancel.clone();
  tokio::spawn(async move {
    let _ = runner.run(token).await;
  });
  cancel
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
  for _ in 0..500 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn run_block_completes_with_polled_result() {
  let (service, _state) = MockJobService::new();
  let service = service.with_result("generate_protein", json!({ "sequence": "MKVLAA" }));
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();

  let outcome = engine.run_block("gen", None).await;
  assert_eq!(outcome, RunOutcome::Submitted);

  wait_for("gen to complete", || {
    engine.block_status("gen") == Some(BlockStatus::Completed)
  })
  .await;

  let output = engine.block_output("gen").unwrap();
  assert_eq!(output["sequence"], "MKVLAA");
}

#[tokio::test]
async fn run_block_skips_unknown_block() {
  let (service, state) = MockJobService::new();
  let engine = test_engine(service);

  let outcome = engine.run_block("ghost", None).await;

  assert_eq!(outcome, RunOutcome::Skipped);
  assert!(state.submits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn resolves_inputs_from_predecessor_outputs() {
  let (service, state) = MockJobService::new();
  let service = service
    .with_result("generate_protein", json!({ "sequence": "MKVLAA" }))
    .with_result("esmfold_predict", json!({ "pdb_file": "/files/pred.pdb" }));
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();
  engine
    .add_block(Block::with_id("predict", BlockKind::EsmfoldPredict))
    .unwrap();
  engine.connect("gen", "sequence", "predict", "sequence").unwrap();

  engine.run_block("gen", None).await;
  wait_for("gen to complete", || {
    engine.block_status("gen") == Some(BlockStatus::Completed)
  })
  .await;

  engine.run_block("predict", None).await;
  wait_for("predict to complete", || {
    engine.block_status("predict") == Some(BlockStatus::Completed)
  })
  .await;

  let payloads = state.submitted_payloads("esmfold_predict");
  assert_eq!(payloads.len(), 1);
  assert_eq!(payloads[0]["sequence"], "MKVLAA");
}

#[tokio::test]
async fn chaining_fans_out_to_all_successors() {
  let (service, state) = MockJobService::new();
  let service = service
    .with_result("generate_protein", json!({ "sequence": "MKVLAA" }))
    .with_result("esmfold_predict", json!({ "pdb_file": "/files/pred.pdb" }))
    .with_result("ncbi_blast_search", json!({ "results": [] }));
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();
  engine
    .add_block(Block::with_id("predict", BlockKind::EsmfoldPredict))
    .unwrap();
  engine
    .add_block(Block::with_id("search", BlockKind::NcbiBlastSearch))
    .unwrap();
  engine.connect("gen", "sequence", "predict", "sequence").unwrap();
  engine.connect("gen", "sequence", "search", "sequence").unwrap();
  engine.set_automation(true);
  let cancel = spawn_dispatch(&engine);

  engine.run_block("gen", None).await;

  wait_for("both successors to complete", || {
    engine.block_status("predict") == Some(BlockStatus::Completed)
      && engine.block_status("search") == Some(BlockStatus::Completed)
  })
  .await;

  // Both downstream blocks were invoked with gen's output.
  let predict_payloads = state.submitted_payloads("esmfold_predict");
  assert_eq!(predict_payloads.len(), 1);
  assert_eq!(predict_payloads[0]["sequence"], "MKVLAA");
  let search_payloads = state.submitted_payloads("ncbi_blast_search");
  assert_eq!(search_payloads.len(), 1);
  assert_eq!(search_payloads[0]["sequence"], "MKVLAA");

  assert!(engine.watermark().is_none());
  cancel.cancel();
}

#[tokio::test]
async fn aggregator_waits_for_all_fan_in_sources() {
  let (service, state) = MockJobService::new();
  let service = service.with_result("generate_protein", json!({ "sequence": "MKV" }));
  let engine = test_engine(service);
  for id in ["a", "b", "c"] {
    engine
      .add_block(Block::with_id(id, BlockKind::GenerateProtein))
      .unwrap();
  }
  engine
    .add_block(Block::with_id("download", BlockKind::MultiDownload))
    .unwrap();
  for id in ["a", "b", "c"] {
    engine.connect(id, "sequence", "download", "input").unwrap();
  }

  // Nothing completed yet: deferred, status untouched, no bundle call.
  assert_eq!(engine.run_block("download", None).await, RunOutcome::Deferred);
  assert_eq!(engine.block_status("download"), Some(BlockStatus::Idle));
  assert!(state.bundles.lock().unwrap().is_empty());

  engine.run_block("a", None).await;
  engine.run_block("b", None).await;
  wait_for("a and b to complete", || {
    engine.block_status("a") == Some(BlockStatus::Completed)
      && engine.block_status("b") == Some(BlockStatus::Completed)
  })
  .await;

  // One source still pending: keep deferring.
  assert_eq!(engine.run_block("download", None).await, RunOutcome::Deferred);
  assert!(state.bundles.lock().unwrap().is_empty());

  engine.run_block("c", None).await;
  wait_for("c to complete", || {
    engine.block_status("c") == Some(BlockStatus::Completed)
  })
  .await;

  assert_eq!(engine.run_block("download", None).await, RunOutcome::Completed);

  let bundles = state.bundles.lock().unwrap();
  assert_eq!(bundles.len(), 1);
  assert_eq!(bundles[0].len(), 3);
  assert!(bundles[0].iter().all(|item| item.output_type == "sequence"));
  drop(bundles);

  let output = engine.block_output("download").unwrap();
  assert_eq!(output["download_url"], "http://localhost:5000/files/bundle.zip");
}

#[tokio::test]
async fn loop_count_mode_terminates_after_target_iterations() {
  let (service, state) = MockJobService::new();
  let service = service.with_result("generate_protein", json!({ "sequence": "MKV" }));
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();
  engine.set_loop_start(Some("gen".to_string()));
  engine.set_loop_end(Some("gen".to_string()));
  engine.set_iteration_mode(IterationMode::Count { target: 3 });
  let cancel = spawn_dispatch(&engine);

  engine.start_loop().await.unwrap();

  wait_for("loop to finish", || !engine.loop_state().enabled).await;

  let loop_state = engine.loop_state();
  assert_eq!(loop_state.current_iteration, 3);
  // The range ran exactly three times; no fourth start invocation.
  tokio::time::sleep(Duration::from_millis(100)).await;
  assert_eq!(state.submit_count("generate_protein"), 3);
  cancel.cancel();
}

#[tokio::test]
async fn loop_sequence_mode_drains_the_iterator() {
  let (service, state) = MockJobService::new();
  let service = service.with_result("esmfold_predict", json!({ "pdb_file": "/files/p.pdb" }));
  let engine = test_engine(service);

  let mut iter = Block::with_id("iter", BlockKind::SequenceIterator);
  iter
    .parameters
    .insert("sequences".to_string(), json!(["AAA", "CCC"]));
  engine.add_block(iter).unwrap();
  engine
    .add_block(Block::with_id("predict", BlockKind::EsmfoldPredict))
    .unwrap();
  engine.connect("iter", "sequence", "predict", "sequence").unwrap();

  engine.set_automation(true);
  engine.set_loop_start(Some("iter".to_string()));
  engine.set_loop_end(Some("predict".to_string()));
  engine.set_iteration_mode(IterationMode::Sequence {
    block_id: "iter".to_string(),
  });
  let cancel = spawn_dispatch(&engine);

  engine.start_loop().await.unwrap();

  wait_for("loop to finish", || !engine.loop_state().enabled).await;
  tokio::time::sleep(Duration::from_millis(100)).await;

  // Two queued sequences drive exactly two iterations.
  assert_eq!(engine.loop_state().current_iteration, 2);
  let payloads = state.submitted_payloads("esmfold_predict");
  assert_eq!(payloads.len(), 2);
  assert_eq!(payloads[0]["sequence"], "AAA");
  assert_eq!(payloads[1]["sequence"], "CCC");
  cancel.cancel();
}

#[tokio::test]
async fn stop_loop_twice_is_idempotent() {
  let (service, _state) = MockJobService::new();
  let engine = test_engine(service);
  for id in ["a", "b"] {
    engine
      .add_block(Block::with_id(id, BlockKind::GenerateProtein))
      .unwrap();
  }
  engine.set_loop_start(Some("a".to_string()));
  engine.set_loop_end(Some("b".to_string()));

  engine.stop_loop();
  let blocks_once = engine.blocks();
  let state_once = engine.loop_state();

  engine.stop_loop();
  let blocks_twice = engine.blocks();
  let state_twice = engine.loop_state();

  assert_eq!(blocks_once, blocks_twice);
  assert!(!state_twice.enabled);
  assert_eq!(state_once.current_iteration, state_twice.current_iteration);
  assert!(blocks_twice
    .iter()
    .all(|b| b.status == BlockStatus::Idle && b.output.is_none()));
}

#[tokio::test]
async fn submission_failure_marks_block_failed() {
  let (service, state) = MockJobService::new();
  let service = service.failing_submit("generate_protein");
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();

  let outcome = engine.run_block("gen", None).await;

  assert_eq!(outcome, RunOutcome::Failed);
  assert_eq!(engine.block_status("gen"), Some(BlockStatus::Failed));
  assert!(state.submits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn poll_failure_marks_block_failed() {
  let (service, _state) = MockJobService::new();
  let service = service.failing_poll("generate_protein");
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();

  let outcome = engine.run_block("gen", None).await;
  assert_eq!(outcome, RunOutcome::Submitted);

  wait_for("gen to fail", || {
    engine.block_status("gen") == Some(BlockStatus::Failed)
  })
  .await;
}

#[tokio::test]
async fn failure_inside_range_halts_loop() {
  let (service, state) = MockJobService::new();
  let service = service.failing_poll("generate_protein");
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();
  engine.set_loop_start(Some("gen".to_string()));
  engine.set_loop_end(Some("gen".to_string()));
  engine.set_iteration_mode(IterationMode::Count { target: 3 });
  let cancel = spawn_dispatch(&engine);

  engine.start_loop().await.unwrap();

  wait_for("loop to halt", || !engine.loop_state().enabled).await;
  tokio::time::sleep(Duration::from_millis(100)).await;

  assert_eq!(engine.block_status("gen"), Some(BlockStatus::Failed));
  // The failed completion never counted as an iteration and nothing was
  // re-run.
  assert_eq!(engine.loop_state().current_iteration, 0);
  assert_eq!(state.submit_count("generate_protein"), 1);
  cancel.cancel();
}

#[tokio::test]
async fn start_loop_rejects_incomplete_configuration() {
  let (service, _state) = MockJobService::new();
  let engine = test_engine(service);
  engine
    .add_block(Block::with_id("gen", BlockKind::GenerateProtein))
    .unwrap();

  // No selection at all.
  assert!(engine.start_loop().await.is_err());

  // Start without end.
  engine.set_loop_start(Some("gen".to_string()));
  assert!(engine.start_loop().await.is_err());

  // Count of zero.
  engine.set_loop_end(Some("gen".to_string()));
  engine.set_iteration_mode(IterationMode::Count { target: 0 });
  assert!(engine.start_loop().await.is_err());

  // Sequence mode pointing at a non-iterator block.
  engine.set_iteration_mode(IterationMode::Sequence {
    block_id: "gen".to_string(),
  });
  assert!(engine.start_loop().await.is_err());

  assert!(!engine.loop_state().enabled);
}

#[tokio::test]
async fn sequence_iterator_pops_in_fifo_order() {
  let (service, _state) = MockJobService::new();
  let engine = test_engine(service);

  let mut iter = Block::with_id("iter", BlockKind::SequenceIterator);
  iter
    .parameters
    .insert("sequences".to_string(), json!(["AAA", "CCC", "GGG"]));
  engine.add_block(iter).unwrap();

  assert_eq!(engine.run_block("iter", None).await, RunOutcome::Completed);
  let output = engine.block_output("iter").unwrap();
  assert_eq!(output["sequence"], "AAA");
  assert_eq!(output["progress"]["completed"], 1);
  assert_eq!(output["progress"]["total"], 3);
  assert_eq!(output["progress"]["remaining"], 2);

  assert_eq!(engine.run_block("iter", None).await, RunOutcome::Completed);
  assert_eq!(engine.block_output("iter").unwrap()["sequence"], "CCC");

  assert_eq!(engine.run_block("iter", None).await, RunOutcome::Completed);
  assert_eq!(engine.block_output("iter").unwrap()["sequence"], "GGG");
  assert_eq!(
    engine.block_output("iter").unwrap()["progress"]["remaining"],
    0
  );

  // Exhausted: a further run fails the block.
  assert_eq!(engine.run_block("iter", None).await, RunOutcome::Failed);
  assert_eq!(engine.block_status("iter"), Some(BlockStatus::Failed));
}
