//! HTTP implementation of the job backend contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::error::JobError;
use crate::service::JobService;
use crate::types::{
  BundleItem, BundleResult, JobConfirmation, JobDescriptor, JobPoll, JobSubmission,
};

/// Default request timeout; structure-prediction jobs are slow to even
/// acknowledge.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Serialize)]
struct SubmitRequest<'a> {
  job_type: &'a str,
  payload: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ConfirmRequest<'a> {
  job_id: &'a str,
  job_data: &'a JobDescriptor,
}

#[derive(Serialize)]
struct BundleRequest<'a> {
  items: &'a [BundleItem],
}

/// Job backend client speaking the platform's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpJobService {
  client: Client,
  base_url: String,
}

impl HttpJobService {
  /// Create a client for the backend at `base_url`.
  pub fn new(base_url: impl Into<String>) -> Result<Self, JobError> {
    let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
    Ok(Self {
      client,
      base_url: base_url.into().trim_end_matches('/').to_string(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }
}

#[async_trait]
impl JobService for HttpJobService {
  async fn submit(
    &self,
    job_type: &str,
    payload: serde_json::Map<String, serde_json::Value>,
  ) -> Result<JobSubmission, JobError> {
    debug!(job_type, "submitting job");
    let response = self
      .client
      .post(self.url("/submit-job"))
      .json(&SubmitRequest {
        job_type,
        payload: &payload,
      })
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn confirm(
    &self,
    job_id: &str,
    descriptor: &JobDescriptor,
  ) -> Result<JobConfirmation, JobError> {
    debug!(job_id, "confirming job");
    let response = self
      .client
      .post(self.url("/confirm-job"))
      .json(&ConfirmRequest {
        job_id,
        job_data: descriptor,
      })
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn poll(&self, job_id: &str) -> Result<JobPoll, JobError> {
    let response = self
      .client
      .get(self.url(&format!("/job-status/{}", job_id)))
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }

  async fn bundle(&self, items: &[BundleItem]) -> Result<BundleResult, JobError> {
    debug!(item_count = items.len(), "requesting combined download");
    let response = self
      .client
      .post(self.url("/download-multiple"))
      .json(&BundleRequest { items })
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }
}
