//! Operon Jobs
//!
//! This crate defines the contract between the pipeline engine and the
//! job backend that actually performs the protein computations. The
//! engine only depends on the [`JobService`] trait; [`HttpJobService`]
//! implements it against the platform's REST endpoints.
//!
//! The backend contract:
//! - `submit` registers a unit of work and returns a job id
//! - `confirm` is the pre-submission confirmation step before polling
//! - `poll` reports current status and, on completion, the result
//! - `bundle` assembles a combined download from several block outputs

mod error;
mod http;
mod service;
mod types;

pub use error::JobError;
pub use http::HttpJobService;
pub use service::JobService;
pub use types::{
  BundleItem, BundleResult, ConfirmedJob, JobConfirmation, JobDescriptor, JobPoll, JobState,
  JobSubmission,
};
