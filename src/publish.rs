//! Posting quotes to Threads through the Graph API.
//!
//! Publishing is two calls: create a TEXT media container, then publish it.
//! Parameters travel in the query string, which the Graph API accepts for
//! both endpoints.

use crate::error::QuoteError;
use crate::store::QuoteStore;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://graph.threads.net";
const API_VERSION: &str = "v1.0";
/// Threads rejects longer posts.
pub const MAX_POST_CHARS: usize = 500;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadsConfig {
    pub access_token: String,
    pub user_id: String,
    pub api_base: String,
}

impl ThreadsConfig {
    /// Read `THREADS_ACCESS_TOKEN`, `THREADS_USER_ID` (or `IG_USER_ID`) and
    /// the optional `THREADS_API_BASE`.
    pub fn from_env() -> Result<Self, QuoteError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, QuoteError> {
        let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());
        let access_token =
            non_empty("THREADS_ACCESS_TOKEN").ok_or(QuoteError::MissingCredentials("THREADS_ACCESS_TOKEN"))?;
        let user_id = non_empty("THREADS_USER_ID")
            .or_else(|| non_empty("IG_USER_ID"))
            .ok_or(QuoteError::MissingCredentials("THREADS_USER_ID"))?;
        let api_base = non_empty("THREADS_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Ok(Self {
            access_token,
            user_id,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }
}

/// Ids returned by a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub container_id: String,
    pub post_id: String,
}

pub struct ThreadsPublisher {
    config: ThreadsConfig,
    http: reqwest::Client,
}

impl ThreadsPublisher {
    pub fn new(config: ThreadsConfig) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| QuoteError::PublishRequest(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Publish `text` as a text post and return the container and post ids.
    ///
    /// # Errors
    /// [`QuoteError::InvalidPost`] for empty text or more than 500 chars;
    /// [`QuoteError::TokenExpired`] when the API reports an expired session;
    /// [`QuoteError::PublishApi`] for other API errors.
    pub async fn publish(&self, text: &str) -> Result<PublishedPost, QuoteError> {
        let text = text.trim();
        validate_post(text)?;

        let container = self
            .post(
                "threads",
                &[
                    ("media_type", "TEXT"),
                    ("text", text),
                    ("access_token", self.config.access_token.as_str()),
                ],
            )
            .await?;
        let container_id = id_field(&container, "container")?;
        debug!("Created Threads container {}", container_id);

        let published = self
            .post(
                "threads_publish",
                &[
                    ("creation_id", container_id.as_str()),
                    ("access_token", self.config.access_token.as_str()),
                ],
            )
            .await?;
        let post_id = id_field(&published, "publish")?;
        info!("Published Threads post {}", post_id);

        Ok(PublishedPost {
            container_id,
            post_id,
        })
    }

    async fn post(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, QuoteError> {
        let url = format!(
            "{}/{API_VERSION}/{}/{endpoint}",
            self.config.api_base, self.config.user_id
        );
        let url = reqwest::Url::parse_with_params(&url, params)
            .map_err(|e| QuoteError::PublishRequest(format!("bad API URL '{url}': {e}")))?;

        let response = self.http.post(url).send().await.map_err(|e| {
            if e.is_timeout() {
                QuoteError::PublishRequest(format!("timed out after {REQUEST_TIMEOUT_SECS}s"))
            } else {
                QuoteError::PublishRequest(e.without_url().to_string())
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuoteError::PublishRequest(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| QuoteError::json("Threads response", e))
    }
}

fn validate_post(text: &str) -> Result<(), QuoteError> {
    if text.is_empty() {
        return Err(QuoteError::InvalidPost("text is empty".to_string()));
    }
    let n = text.chars().count();
    if n > MAX_POST_CHARS {
        return Err(QuoteError::InvalidPost(format!(
            "{n} characters, Threads allows {MAX_POST_CHARS}"
        )));
    }
    Ok(())
}

/// `error.message` of an API error body, else the first 200 chars of it.
fn api_error(status: u16, body: &str) -> QuoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());
    if message.to_lowercase().contains("expired") {
        QuoteError::TokenExpired(message)
    } else {
        QuoteError::PublishApi { status, message }
    }
}

fn id_field(v: &Value, step: &str) -> Result<String, QuoteError> {
    match v.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(QuoteError::PublishApi {
            status: 200,
            message: format!("{step} response has no id: {v}"),
        }),
    }
}

/// Publish a stored quote and mark it published.
pub async fn publish_stored(
    store: &QuoteStore,
    publisher: &ThreadsPublisher,
    quote_id: i64,
) -> Result<PublishedPost, QuoteError> {
    let stored = store.get_quote(quote_id)?.ok_or(QuoteError::NotFound {
        entity: "quote",
        id: quote_id,
    })?;
    let post = publisher.publish(stored.quote.publish_text()).await?;
    store.mark_published(quote_id)?;
    Ok(post)
}
