//! HTTP implementation of the notes API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiError, ApiResult, ReachabilityCheck, NotesApi};
use crate::config::Config;
use crate::models::{NotePayload, RemoteNote};
use crate::sync::SyncError;

/// Upper bound on connection setup, independent of the request timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer-authenticated client for the remote notes API
#[derive(Clone)]
pub struct HttpNotesApi {
    client: Client,
    base_url: Url,
    token: String,
}

#[derive(Serialize)]
struct CreateNoteBody<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpNotesApi {
    /// Create a client for the API rooted at `base_url`
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .user_agent(concat!("jotter/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Build a client from `api_url`, `api_token` and `request_timeout_secs`
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        match (&config.api_url, &config.api_token) {
            (Some(url), Some(token)) => Ok(Self::new(url, token.clone(), config.request_timeout())?),
            _ => Err(SyncError::NotConfigured),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base}/notes` followed by `extra` path segments, each escaped
    fn url(&self, extra: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("notes")
            .extend(extra);
        Ok(url)
    }

    /// Turn a non-success response into an `ApiError::Status`
    async fn check(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(status, &text),
        })
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("Unknown error").to_string()
    } else {
        body.trim().to_string()
    }
}

#[async_trait]
impl NotesApi for HttpNotesApi {
    async fn create_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
        let url = self.url(&[])?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&CreateNoteBody {
                id: note_id,
                title: &payload.title,
                content: &payload.content,
            })
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_note(&self, note_id: &str, payload: &NotePayload) -> ApiResult<RemoteNote> {
        let url = self.url(&[note_id])?;
        debug!("PUT {}", url);

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_note(&self, note_id: &str) -> ApiResult<()> {
        let url = self.url(&[note_id])?;
        debug!("DELETE {}", url);

        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        // Already gone on the server is what we wanted
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Note {} was already deleted remotely", note_id);
            return Ok(());
        }

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ReachabilityCheck for HttpNotesApi {
    /// Any HTTP answer from the base URL counts as reachable
    async fn is_reachable(&self) -> bool {
        match self.client.head(self.base_url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("API unreachable: {}", e);
                false
            }
        }
    }
}
