//! HTTP gateway for Conductor-compatible engines.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::gateway::WorkflowGateway;
use crate::types::{Payload, Task, TaskUpdate, WorkflowRun};

/// Header carrying the access token on authenticated servers.
const AUTH_HEADER: &str = "X-Authorization";

/// Key id / secret pair exchanged for an access token.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
  pub key_id: String,
  pub key_secret: String,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("key_id", &self.key_id)
      .field("key_secret", &"***")
      .finish()
  }
}

/// Configuration for [`ConductorGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
  /// API root, e.g. `https://developer.orkescloud.com/api`.
  pub base_url: String,
  /// Omit for servers running without authentication.
  pub credentials: Option<Credentials>,
  pub request_timeout: Duration,
}

impl GatewayConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url: base_url.into(),
      credentials: None,
      request_timeout: Duration::from_secs(30),
    }
  }

  pub fn with_credentials(mut self, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
    self.credentials = Some(Credentials {
      key_id: key_id.into(),
      key_secret: key_secret.into(),
    });
    self
  }
}

#[derive(Deserialize)]
struct TokenResponse {
  token: String,
}

/// [`WorkflowGateway`] backed by the Conductor REST API.
pub struct ConductorGateway {
  client: Client,
  config: GatewayConfig,
  token: RwLock<Option<String>>,
}

impl ConductorGateway {
  pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
    let client = Client::builder().timeout(config.request_timeout).build()?;
    Ok(Self {
      client,
      config,
      token: RwLock::new(None),
    })
  }

  pub fn config(&self) -> &GatewayConfig {
    &self.config
  }

  fn url(&self, path: &str) -> String {
    format!(
      "{}/{}",
      self.config.base_url.trim_end_matches('/'),
      path.trim_start_matches('/')
    )
  }

  /// Return the cached token, exchanging credentials when none is cached or
  /// the cached one is `rejected`. `None` when the server needs no
  /// authentication.
  async fn token(&self, rejected: Option<&str>) -> Result<Option<String>, GatewayError> {
    let Some(credentials) = &self.config.credentials else {
      return Ok(None);
    };

    if rejected.is_none()
      && let Some(token) = self.token.read().await.as_ref()
    {
      return Ok(Some(token.clone()));
    }

    let mut slot = self.token.write().await;
    // Another caller may have exchanged while we waited for the lock.
    if let Some(token) = slot.as_ref()
      && Some(token.as_str()) != rejected
    {
      return Ok(Some(token.clone()));
    }

    debug!(key_id = %credentials.key_id, "requesting access token");

    let response = self
      .client
      .post(self.url("token"))
      .json(credentials)
      .send()
      .await?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(GatewayError::Auth {
        message: format!("token exchange returned {}: {}", status.as_u16(), body),
      });
    }

    let body = response.text().await?;
    let token: TokenResponse = decode(&body)?;
    *slot = Some(token.token.clone());
    Ok(Some(token.token))
  }

  /// Send a request, retrying once with a fresh token on 401.
  async fn send<F>(&self, build: F) -> Result<Response, GatewayError>
  where
    F: Fn(&Client) -> RequestBuilder,
  {
    let token = self.token(None).await?;
    let response = authorize(build(&self.client), token.as_deref()).send().await?;

    if response.status() != StatusCode::UNAUTHORIZED || self.config.credentials.is_none() {
      return Ok(response);
    }

    warn!("access token rejected, refreshing");
    let token = self.token(token.as_deref()).await?;
    let response = authorize(build(&self.client), token.as_deref()).send().await?;
    if response.status() == StatusCode::UNAUTHORIZED {
      return Err(GatewayError::Auth {
        message: "credentials rejected by engine".to_string(),
      });
    }
    Ok(response)
  }
}

fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
  match token {
    Some(token) => request.header(AUTH_HEADER, token),
    None => request,
  }
}

/// Map non-success responses to errors and return the body text.
async fn read_body(response: Response, resource: &str) -> Result<String, GatewayError> {
  let status = response.status();
  if status == StatusCode::NOT_FOUND {
    return Err(GatewayError::not_found(resource));
  }
  let body = response.text().await?;
  if !status.is_success() {
    return Err(GatewayError::Status {
      status: status.as_u16(),
      body,
    });
  }
  Ok(body)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
  serde_json::from_str(body).map_err(|e| GatewayError::Decode {
    message: e.to_string(),
  })
}

#[async_trait]
impl WorkflowGateway for ConductorGateway {
  #[instrument(skip(self, input))]
  async fn start_run(
    &self,
    name: &str,
    version: u32,
    input: Payload,
  ) -> Result<String, GatewayError> {
    let url = self.url(&format!("workflow/{}", name));
    let response = self
      .send(|client| {
        client
          .post(&url)
          .query(&[("version", version)])
          .json(&input)
      })
      .await?;

    let body = read_body(response, &format!("workflow definition '{}'", name)).await?;
    let run_id = body.trim().trim_matches('"').to_string();
    if run_id.is_empty() {
      return Err(GatewayError::Decode {
        message: "engine returned an empty run id".to_string(),
      });
    }
    Ok(run_id)
  }

  async fn get_run(&self, run_id: &str, include_tasks: bool) -> Result<WorkflowRun, GatewayError> {
    let url = self.url(&format!("workflow/{}", run_id));
    let response = self
      .send(|client| client.get(&url).query(&[("includeTasks", include_tasks)]))
      .await?;

    let body = read_body(response, &format!("run '{}'", run_id)).await?;
    decode(&body)
  }

  async fn get_task(&self, task_id: &str) -> Result<Task, GatewayError> {
    let url = self.url(&format!("tasks/{}", task_id));
    let response = self.send(|client| client.get(&url)).await?;

    let body = read_body(response, &format!("task '{}'", task_id)).await?;
    decode(&body)
  }

  async fn poll_task(
    &self,
    task_type: &str,
    worker_id: &str,
  ) -> Result<Option<Task>, GatewayError> {
    let url = self.url(&format!("tasks/poll/{}", task_type));
    let response = self
      .send(|client| client.get(&url).query(&[("workerid", worker_id)]))
      .await?;

    if response.status() == StatusCode::NO_CONTENT {
      return Ok(None);
    }
    let body = read_body(response, &format!("task type '{}'", task_type)).await?;
    if body.trim().is_empty() {
      return Ok(None);
    }
    decode(&body).map(Some)
  }

  #[instrument(skip(self, update), fields(task_id = %update.task_id, run_id = %update.run_id))]
  async fn update_task(&self, update: &TaskUpdate) -> Result<(), GatewayError> {
    let url = self.url("tasks");
    let response = self.send(|client| client.post(&url).json(update)).await?;

    read_body(response, &format!("task '{}'", update.task_id)).await?;
    Ok(())
  }

  async fn terminate_run(&self, run_id: &str, reason: &str) -> Result<(), GatewayError> {
    let url = self.url(&format!("workflow/{}", run_id));
    let response = self
      .send(|client| client.delete(&url).query(&[("reason", reason)]))
      .await?;

    read_body(response, &format!("run '{}'", run_id)).await?;
    Ok(())
  }
}
