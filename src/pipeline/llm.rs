//! LLM access: the completion seam, retries and provider resolution.
//!
//! Every model call in the crate goes through [`LlmClient::complete`]. The
//! client owns two backends, a *smart* one for extraction and rewriting and
//! a *fast* one for cheap yes/no classification, and wraps each call in a
//! timeout plus exponential backoff. Prompt text lives in
//! [`crate::prompts`]; JSON recovery from chatty replies lives in
//! [`parse_json_response`].
//!
//! ## Retry Strategy
//!
//! 429 / 503 responses are common under concurrent load. The wait before
//! retry `n` is `retry_backoff_ms * 2^(n-1)`: with 500 ms base and 3 retries
//! the sequence is 500 ms → 1 s → 2 s. A single wait never exceeds one minute.

use crate::config::ExtractionConfig;
use crate::error::QuoteError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o";
/// Fast-tier model used with the OpenAI fallback.
pub const DEFAULT_FAST_MODEL: &str = "gpt-4o-mini";

const JSON_INSTRUCTION: &str = "Respond with a single valid JSON object and nothing else.";

// ── Requests ─────────────────────────────────────────────────────────────

/// Which backend a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Extraction, translation, rewriting.
    Smart,
    /// Classification and other short answers.
    Fast,
}

/// A single system + user exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// `None` uses the client default.
    pub temperature: Option<f32>,
    /// `None` uses the client default.
    pub max_tokens: Option<usize>,
    /// Ask for a bare JSON object.
    pub json: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
            max_tokens: None,
            json: false,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// System prompt as sent, with the JSON instruction appended when asked.
    pub fn system_prompt(&self) -> String {
        if self.json {
            format!("{}\n\n{}", self.system, JSON_INSTRUCTION)
        } else {
            self.system.clone()
        }
    }
}

/// Model reply with token usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Anything that can answer a [`CompletionRequest`].
///
/// Implemented by [`ProviderBackend`] for real providers; tests plug in
/// scripted backends through [`ExtractionConfig::backend`].
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, QuoteError>>;

    /// Label used in logs.
    fn name(&self) -> String {
        "custom".to_string()
    }
}

/// [`CompletionBackend`] over an `edgequake_llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

impl CompletionBackend for ProviderBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, QuoteError>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(request.system_prompt()),
                ChatMessage::user(request.user.as_str()),
            ];
            let options = CompletionOptions {
                temperature: request.temperature,
                max_tokens: request.max_tokens,
                ..Default::default()
            };
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| QuoteError::LlmApiError {
                    message: e.to_string(),
                })?;
            Ok(Completion {
                content: response.content,
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
            })
        })
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Running token totals shared by every clone of a client.
#[derive(Debug, Default)]
pub struct TokenUsage {
    input: AtomicU64,
    output: AtomicU64,
    calls: AtomicU64,
}

impl TokenUsage {
    pub fn input_tokens(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    /// Successful calls.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn record(&self, c: &Completion) {
        self.input.fetch_add(c.input_tokens, Ordering::Relaxed);
        self.output.fetch_add(c.output_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Longest single wait between retries.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Wait before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped at
/// [`MAX_BACKOFF_MS`].
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base.saturating_mul(factor))
        .min(MAX_BACKOFF_MS)
}

/// Smart and fast backends plus retry policy. Cheap to clone.
#[derive(Clone)]
pub struct LlmClient {
    smart: Arc<dyn CompletionBackend>,
    fast: Arc<dyn CompletionBackend>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
    usage: Arc<TokenUsage>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("smart", &self.smart.name())
            .field("fast", &self.fast.name())
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LlmClient {
    /// A client with the retry/timeout settings of `config`.
    pub fn new(
        smart: Arc<dyn CompletionBackend>,
        fast: Arc<dyn CompletionBackend>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            smart,
            fast,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
            usage: Arc::new(TokenUsage::default()),
        }
    }

    /// Both tiers served by one backend.
    pub fn single(backend: Arc<dyn CompletionBackend>, config: &ExtractionConfig) -> Self {
        Self::new(Arc::clone(&backend), backend, config)
    }

    pub fn usage(&self) -> &TokenUsage {
        &self.usage
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Backend label for `tier`, e.g. `openai/gpt-4o`.
    pub fn label(&self, tier: ModelTier) -> String {
        match tier {
            ModelTier::Smart => self.smart.name(),
            ModelTier::Fast => self.fast.name(),
        }
    }

    /// Send `request` to the backend for `tier`, retrying failures.
    ///
    /// Returns [`QuoteError::LlmTimeout`] when every attempt timed out and
    /// the last API error otherwise.
    pub async fn complete(
        &self,
        tier: ModelTier,
        request: &CompletionRequest,
    ) -> Result<Completion, QuoteError> {
        let backend = match tier {
            ModelTier::Smart => &self.smart,
            ModelTier::Fast => &self.fast,
        };
        let mut request = request.clone();
        request.temperature.get_or_insert(self.temperature);
        request.max_tokens.get_or_insert(self.max_tokens);

        let mut last_err: Option<QuoteError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{} call: retry {}/{} after {}ms",
                    backend.name(),
                    attempt,
                    self.max_retries,
                    backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = backend.complete(&request);
            match timeout(Duration::from_secs(self.timeout_secs), call).await {
                Ok(Ok(completion)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        backend.name(),
                        completion.input_tokens,
                        completion.output_tokens
                    );
                    self.usage.record(&completion);
                    return Ok(completion);
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed: {}", backend.name(), attempt + 1, e);
                    last_err = Some(e);
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        backend.name(),
                        attempt + 1,
                        self.timeout_secs
                    );
                    if !matches!(last_err, Some(QuoteError::LlmApiError { .. })) {
                        last_err = Some(QuoteError::LlmTimeout {
                            secs: self.timeout_secs,
                        });
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| QuoteError::LlmApiError {
            message: "Unknown error".to_string(),
        }))
    }

    /// [`complete`](Self::complete) then [`parse_json_response`].
    pub async fn complete_json(
        &self,
        tier: ModelTier,
        request: &CompletionRequest,
    ) -> Result<Value, QuoteError> {
        let request = request.clone().json();
        let reply = self.complete(tier, &request).await?;
        parse_json_response(&reply.content).ok_or_else(|| QuoteError::LlmApiError {
            message: format!(
                "model reply is not JSON: {}",
                crate::pipeline::chunk::truncate_chars(&reply.content, 120)
            ),
        })
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn CompletionBackend>, QuoteError> {
    let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        QuoteError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderBackend::new(
        provider,
        format!("{name}/{model}"),
    )))
}

/// Smart and fast backends for a named provider. The fast tier reuses the
/// smart backend unless a distinct fast model is given.
fn named_pair(name: &str, smart_model: &str, fast_model: Option<&str>) -> Result<LlmPair, QuoteError> {
    let smart = create_provider(name, smart_model)?;
    let fast = match fast_model {
        Some(m) if m != smart_model => create_provider(name, m)?,
        _ => Arc::clone(&smart),
    };
    Ok((smart, fast))
}

type LlmPair = (Arc<dyn CompletionBackend>, Arc<dyn CompletionBackend>);

/// Build the client for a run, from most to least specific:
///
/// 1. **Pre-built backend** (`config.backend`), used as-is for both tiers.
/// 2. **Pre-built provider** (`config.provider`).
/// 3. **Named provider** (`config.provider_name` + `config.model`). Failure
///    here is always fatal: the caller asked for this provider.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **OpenAI** when `OPENAI_API_KEY` is set (smart `gpt-4o`, fast
///    `gpt-4o-mini` unless overridden).
/// 6. **Auto-detection** (`ProviderFactory::from_env`).
///
/// When steps 4–6 find nothing and `config.offline_fallback` is set, returns
/// `Ok(None)`: the pipeline then runs on heuristics alone.
pub fn resolve_client(config: &ExtractionConfig) -> Result<Option<LlmClient>, QuoteError> {
    if let Some(ref backend) = config.backend {
        return Ok(Some(LlmClient::single(Arc::clone(backend), config)));
    }

    if let Some(ref provider) = config.provider {
        let backend: Arc<dyn CompletionBackend> =
            Arc::new(ProviderBackend::new(Arc::clone(provider), "provider"));
        return Ok(Some(LlmClient::single(backend, config)));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let (smart, fast) = named_pair(name, model, config.fast_model.as_deref())?;
        info!("Using LLM provider {name} ({model})");
        return Ok(Some(LlmClient::new(smart, fast, config)));
    }

    match auto_detect(config) {
        Ok((smart, fast)) => {
            info!("Using LLM backend {}", smart.name());
            Ok(Some(LlmClient::new(smart, fast, config)))
        }
        Err(e) if config.offline_fallback => {
            warn!("No LLM provider available, continuing with heuristics only: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn auto_detect(config: &ExtractionConfig) -> Result<LlmPair, QuoteError> {
    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return named_pair(&prov, &model, config.fast_model.as_deref());
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let smart = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            let fast = config.fast_model.as_deref().unwrap_or(DEFAULT_FAST_MODEL);
            return named_pair("openai", smart, Some(fast));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| QuoteError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {e}"
            ),
        })?;
    let backend: Arc<dyn CompletionBackend> = Arc::new(ProviderBackend::new(provider, "auto"));
    Ok((Arc::clone(&backend), backend))
}

// ── JSON recovery ────────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").unwrap());

/// Parse the JSON object in a model reply.
///
/// Tries, in order: the whole reply, a fenced ```` ```json ```` block, and
/// the span from the first `{` to the last `}`. Returns `None` when none of
/// them parses.
pub fn parse_json_response(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }

    if let Some(caps) = RE_JSON_FENCE.captures(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&caps[1]) {
            return Some(v);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 64), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(500, u32::MAX), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u64::MAX, 2), MAX_BACKOFF_MS);
    }

    /// Replies from a queue; an `Err` entry simulates an API failure.
    struct Scripted {
        replies: Mutex<VecDeque<Result<&'static str, &'static str>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CompletionBackend for Scripted {
        fn complete<'a>(
            &'a self,
            request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<Completion, QuoteError>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(request.clone());
                match self.replies.lock().unwrap().pop_front() {
                    Some(Ok(text)) => Ok(Completion {
                        content: text.to_string(),
                        input_tokens: 10,
                        output_tokens: 5,
                    }),
                    Some(Err(msg)) => Err(QuoteError::LlmApiError {
                        message: msg.to_string(),
                    }),
                    None => Err(QuoteError::LlmApiError {
                        message: "script exhausted".to_string(),
                    }),
                }
            })
        }
    }

    fn fast_config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let backend = Scripted::new(vec![Err("429"), Ok("hello")]);
        let client = LlmClient::single(backend.clone(), &fast_config());

        let reply = client
            .complete(ModelTier::Smart, &CompletionRequest::new("sys", "user"))
            .await
            .unwrap();
        assert_eq!(reply.content, "hello");
        assert_eq!(backend.seen.lock().unwrap().len(), 2);
        assert_eq!(client.usage().calls(), 1);
        assert_eq!(client.usage().input_tokens(), 10);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let backend = Scripted::new(vec![Err("a"), Err("b"), Err("c"), Ok("late")]);
        let client = LlmClient::single(backend.clone(), &fast_config());

        let err = client
            .complete(ModelTier::Fast, &CompletionRequest::new("sys", "user"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains('c'), "got: {err}");
        assert_eq!(backend.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn client_fills_default_sampling_options() {
        let backend = Scripted::new(vec![Ok("{}")]);
        let client = LlmClient::single(backend.clone(), &fast_config());
        client
            .complete(
                ModelTier::Smart,
                &CompletionRequest::new("s", "u").temperature(0.0),
            )
            .await
            .unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, Some(0.0));
        assert_eq!(seen[0].max_tokens, Some(2048));
    }

    #[tokio::test]
    async fn complete_json_parses_fenced_reply() {
        let backend = Scripted::new(vec![Ok("Sure!\n```json\n{\"valid\": true}\n```")]);
        let client = LlmClient::single(backend.clone(), &fast_config());
        let v = client
            .complete_json(ModelTier::Fast, &CompletionRequest::new("s", "u"))
            .await
            .unwrap();
        assert_eq!(v["valid"], true);
        assert!(backend.seen.lock().unwrap()[0].json);
    }

    #[test]
    fn json_request_appends_instruction() {
        let r = CompletionRequest::new("Extract quotes.", "text").json();
        assert!(r.system_prompt().ends_with(JSON_INSTRUCTION));
        assert_eq!(CompletionRequest::new("a", "b").system_prompt(), "a");
    }

    #[test]
    fn parse_json_direct() {
        assert_eq!(parse_json_response(r#"{"a":1}"#).unwrap()["a"], 1);
    }

    #[test]
    fn parse_json_with_prose_around() {
        let v = parse_json_response("Here you go: {\"topic\": \"sales\"} Hope it helps.").unwrap();
        assert_eq!(v["topic"], "sales");
    }

    #[test]
    fn parse_json_garbage_is_none() {
        assert!(parse_json_response("no json here").is_none());
        assert!(parse_json_response("} backwards {").is_none());
    }

    #[test]
    fn explicit_backend_wins() {
        let backend = Scripted::new(vec![]);
        let config = ExtractionConfig::builder()
            .backend(backend)
            .build()
            .unwrap();
        let client = resolve_client(&config).unwrap();
        assert!(client.is_some());
    }
}
