//! Boundary to the remote indexing service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{Result, batch::Batch, error::HttpError};

/// How a batch is applied remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadMode {
   /// First population of a freshly created index.
   Initialize,
   /// Incremental changes against an existing index.
   Reinitialize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMatch {
   pub path:       String,
   pub start_line: u64,
   pub end_line:   u64,
   pub content:    String,
}

/// Operations the sync engine needs from the remote side.
///
/// Uploads must be idempotent per `(sync_id, batch_index)`; the engine may
/// resend an identical batch after an unclear failure.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
   /// Creates an empty remote index and returns its sync id.
   async fn create(&self) -> Result<String>;

   async fn upload(&self, batch: &Batch, mode: UploadMode) -> Result<()>;

   async fn validate(&self, sync_id: &str) -> Result<bool>;

   async fn query(&self, sync_id: &str, query: &str, limit: usize) -> Result<Vec<QueryMatch>>;

   async fn delete(&self, sync_id: &str) -> Result<()>;
}

/// [`RemoteIndex`] over the service's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
   client:   Client,
   base_url: String,
}

impl HttpRemote {
   pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
      let client = Client::builder()
         .timeout(timeout)
         .build()
         .map_err(HttpError::Request)?;
      Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
   }

   pub fn from_config(cfg: &crate::config::Config) -> Result<Self> {
      Self::new(&cfg.api_base_url, Duration::from_millis(cfg.request_timeout_ms))
   }

   fn request(&self, method: Method, path: &str) -> RequestBuilder {
      self.client.request(method, format!("{}/{path}", self.base_url))
   }

   async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response> {
      let response = request.send().await.map_err(HttpError::Request)?;
      let status = response.status();
      if !status.is_success() {
         tracing::warn!("{op} failed with status {status}");
         return Err(HttpError::StatusCode { op, status: status.as_u16() }.into());
      }
      Ok(response)
   }

   async fn json<T: for<'de> Deserialize<'de>>(op: &'static str, response: Response) -> Result<T> {
      response
         .json::<T>()
         .await
         .map_err(|e| HttpError::UnexpectedResponse { op, reason: e.to_string() }.into())
   }
}

#[derive(Deserialize)]
struct CreateResponse {
   repository_id: String,
}

#[derive(Deserialize)]
struct ValidateResponse {
   repository_id_is_valid: bool,
}

#[async_trait]
impl RemoteIndex for HttpRemote {
   async fn create(&self) -> Result<String> {
      let response = self.send("create", self.request(Method::POST, "create_repository")).await?;
      let body: CreateResponse = Self::json("create", response).await?;
      Ok(body.repository_id)
   }

   async fn upload(&self, batch: &Batch, mode: UploadMode) -> Result<()> {
      let request = match mode {
         UploadMode::Initialize => self.request(Method::POST, "initialize_repository"),
         UploadMode::Reinitialize => self.request(Method::PUT, "reinitialize_repository"),
      };
      self.send("upload", request.json(batch)).await?;
      Ok(())
   }

   async fn validate(&self, sync_id: &str) -> Result<bool> {
      let request = self
         .request(Method::POST, "validate_repository_id")
         .json(&json!({ "repository_id": sync_id }));
      let response = self.send("validate", request).await?;
      let body: ValidateResponse = Self::json("validate", response).await?;
      Ok(body.repository_id_is_valid)
   }

   async fn query(&self, sync_id: &str, query: &str, limit: usize) -> Result<Vec<QueryMatch>> {
      let limit = limit.to_string();
      let request = self.request(Method::GET, "query").query(&[
         ("repository-id", sync_id),
         ("query-string", query),
         ("limit", limit.as_str()),
      ]);
      let response = self.send("query", request).await?;
      Self::json("query", response).await
   }

   async fn delete(&self, sync_id: &str) -> Result<()> {
      let request = self
         .request(Method::DELETE, "uninitialize_repository")
         .json(&json!({ "repository_id": sync_id }));
      self.send("delete", request).await?;
      Ok(())
   }
}
