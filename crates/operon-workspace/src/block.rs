//! Block instances and the block-kind palette.

use serde::{Deserialize, Serialize};

/// Port name that matches any concrete port during validation.
pub const WILDCARD_PORT: &str = "*";

/// Lifecycle status of a block instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
  #[default]
  Idle,
  Running,
  Completed,
  Failed,
}

/// Execution role of a block kind, driving executor dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
  /// Pops one element per run from a queued sequence list; no external job.
  Iterator,
  /// Fans in all predecessor outputs into one combined bundling call.
  Aggregator,
  /// Submits an asynchronous job to the job backend and is polled to
  /// completion.
  Compute,
}

/// The capability of a block, naming its input/output ports and the job
/// type submitted to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
  FileUpload,
  MultiDownload,
  GenerateProtein,
  SequenceIterator,
  EsmfoldPredict,
  OpenfoldPredict,
  Alphafold2Predict,
  ColabfoldSearch,
  NcbiBlastSearch,
  LocalBlastSearch,
  SearchStructure,
  BlastDbBuilder,
  PerformDocking,
}

impl BlockKind {
  /// Input port names this kind declares.
  pub fn inputs(&self) -> &'static [&'static str] {
    match self {
      BlockKind::FileUpload => &[],
      BlockKind::MultiDownload => &[WILDCARD_PORT],
      BlockKind::GenerateProtein => &[],
      BlockKind::SequenceIterator => &["sequences_list"],
      BlockKind::EsmfoldPredict
      | BlockKind::OpenfoldPredict
      | BlockKind::Alphafold2Predict
      | BlockKind::ColabfoldSearch
      | BlockKind::NcbiBlastSearch => &["sequence"],
      BlockKind::LocalBlastSearch => &["sequence", "database"],
      BlockKind::SearchStructure => &["structure"],
      BlockKind::BlastDbBuilder => &[],
      BlockKind::PerformDocking => &["structure", "molecule"],
    }
  }

  /// Output port names this kind declares.
  pub fn outputs(&self) -> &'static [&'static str] {
    match self {
      BlockKind::FileUpload => &["structure", "molecule", "sequence", "sequences_list"],
      BlockKind::MultiDownload => &[],
      BlockKind::GenerateProtein => &["sequence"],
      BlockKind::SequenceIterator => &["sequence"],
      BlockKind::EsmfoldPredict
      | BlockKind::OpenfoldPredict
      | BlockKind::Alphafold2Predict => &["structure"],
      BlockKind::ColabfoldSearch
      | BlockKind::NcbiBlastSearch
      | BlockKind::LocalBlastSearch
      | BlockKind::SearchStructure => &["results"],
      BlockKind::BlastDbBuilder => &["database", "fasta"],
      BlockKind::PerformDocking => &["results"],
    }
  }

  /// Wire identifier submitted to the job backend as the job type.
  pub fn job_type(&self) -> &'static str {
    match self {
      BlockKind::FileUpload => "file_upload",
      BlockKind::MultiDownload => "multi_download",
      BlockKind::GenerateProtein => "generate_protein",
      BlockKind::SequenceIterator => "sequence_iterator",
      BlockKind::EsmfoldPredict => "esmfold_predict",
      BlockKind::OpenfoldPredict => "openfold_predict",
      BlockKind::Alphafold2Predict => "alphafold2_predict",
      BlockKind::ColabfoldSearch => "colabfold_search",
      BlockKind::NcbiBlastSearch => "ncbi_blast_search",
      BlockKind::LocalBlastSearch => "local_blast_search",
      BlockKind::SearchStructure => "search_structure",
      BlockKind::BlastDbBuilder => "blast_db_builder",
      BlockKind::PerformDocking => "perform_docking",
    }
  }

  /// Human description carried into the job descriptor.
  pub fn description(&self) -> &'static str {
    match self {
      BlockKind::FileUpload => "Upload PDB, SDF, or MOL2 files for structure or molecule analysis",
      BlockKind::MultiDownload => "Download output from multiple blocks once they are completed",
      BlockKind::GenerateProtein => "Generate a protein sequence with specific properties",
      BlockKind::SequenceIterator => {
        "Iterate through sequences from FASTA file or pasted sequences"
      }
      BlockKind::EsmfoldPredict => "Predict structure using ESMFold",
      BlockKind::OpenfoldPredict => "Predict structure using OpenFold",
      BlockKind::Alphafold2Predict => "Predict structure using AlphaFold2",
      BlockKind::ColabfoldSearch => "Search using ColabFold MSA",
      BlockKind::NcbiBlastSearch => "Search using NCBI BLAST",
      BlockKind::LocalBlastSearch => "Search using Local BLAST",
      BlockKind::SearchStructure => "Search for similar protein structures using FoldSeek",
      BlockKind::BlastDbBuilder => "Build a BLAST database from FASTA file or Pfam IDs",
      BlockKind::PerformDocking => "Perform molecular docking between a protein and ligand",
    }
  }

  /// Execution role of this kind.
  pub fn role(&self) -> BlockRole {
    match self {
      BlockKind::SequenceIterator => BlockRole::Iterator,
      BlockKind::MultiDownload => BlockRole::Aggregator,
      _ => BlockRole::Compute,
    }
  }

  /// Whether this kind fans in multiple sources on one logical input.
  pub fn is_aggregator(&self) -> bool {
    self.role() == BlockRole::Aggregator
  }
}

/// Canvas position of a block. Irrelevant to engine correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

/// One placed block instance in the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
  pub id: String,
  pub kind: BlockKind,
  #[serde(default)]
  pub position: Position,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub width: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub height: Option<f64>,
  /// User-supplied configuration, opaque to the store.
  #[serde(default)]
  pub parameters: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub status: BlockStatus,
  /// Last successful result payload, opaque to the engine.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
}

impl Block {
  /// Create a block with a generated id.
  pub fn new(kind: BlockKind) -> Self {
    Self::with_id(uuid::Uuid::new_v4().to_string(), kind)
  }

  /// Create a block with a caller-supplied id.
  pub fn with_id(id: impl Into<String>, kind: BlockKind) -> Self {
    Self {
      id: id.into(),
      kind,
      position: Position::default(),
      width: None,
      height: None,
      parameters: serde_json::Map::new(),
      status: BlockStatus::Idle,
      output: None,
    }
  }
}
