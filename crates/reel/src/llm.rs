//! Completion client for an OpenRouter-compatible chat-completions endpoint.
//!
//! Owns the conversation transcript of one generation session and turns
//! model replies into sanitized candidate source.

use std::time::Duration;

use reel_core::config::API_KEY_ENV;
use reel_core::fence::strip_code_fences;
use reel_core::prompt::{
    build_code_prompt, build_fix_prompt, build_script_prompt, build_user_prompt,
    code_system_prompt, SCRIPT_SYSTEM_PROMPT,
};
use reel_core::{Config, Message, Transcript};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::session::CodeGenerator;

/// Temperature used for the reasoning-enabled script call.
const REASONING_TEMPERATURE: f32 = 0.8;

/// Model families that accept OpenRouter reasoning parameters.
const REASONING_MODELS: [&str; 2] = ["deepseek", "qwen"];

/// Characters of model reasoning shown in debug logs.
const REASONING_PREVIEW_CHARS: usize = 200;

/// Characters of a planned script echoed to the log.
const SCRIPT_PREVIEW_CHARS: usize = 500;

const REFERER: &str = "https://github.com/reel-contributors/reel";
const TITLE: &str = "reel";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request_fix called before an initial code request")]
    Sequence,

    #[error("API request failed: {status} - {body}")]
    Transport { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport {
            status: e.status().map_or(0, |s| s.as_u16()),
            body: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub http_timeout: Duration,
    /// Plan a script in a separate call before generating code.
    pub two_phase: bool,
    /// Scene class the generated code must define.
    pub scene_class: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http_timeout: Duration::from_secs(u64::from(config.http_timeout_sec)),
            two_phase: config.two_phase,
            scene_class: config.scene_class.clone(),
        }
    }

    fn supports_reasoning(&self) -> bool {
        REASONING_MODELS.iter().any(|m| self.model.contains(m))
    }
}

/// Messages that open a session: the script call in two-phase mode, the
/// code call otherwise.
pub fn opening_messages(
    config: &ClientConfig,
    user_request: &str,
    context: Option<&str>,
) -> Vec<Message> {
    if config.two_phase {
        vec![
            Message::system(SCRIPT_SYSTEM_PROMPT),
            Message::user(build_script_prompt(user_request, context)),
        ]
    } else {
        vec![
            Message::system(code_system_prompt(&config.scene_class)),
            Message::user(build_user_prompt(user_request, context)),
        ]
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_reasoning: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ReasoningParams {
    effort: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Option<Choice>>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
}

/// Extract the assistant text from a raw response body.
///
/// Blank `content` falls back to `reasoning_content`; if both are blank the
/// endpoint misbehaved and a `Protocol` error is returned.
pub(crate) fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::Protocol(format!("response is not valid JSON: {e}")))?;

    let choices = parsed
        .choices
        .ok_or_else(|| LlmError::Protocol("no 'choices' in response".to_string()))?;
    let choice = choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Protocol("empty 'choices' array in response".to_string()))?
        .ok_or_else(|| LlmError::Protocol("first choice is null".to_string()))?;
    let message = choice
        .message
        .ok_or_else(|| LlmError::Protocol("no 'message' in choice".to_string()))?;

    if let Some(reasoning) = message.reasoning.as_deref().filter(|r| !r.is_empty()) {
        let preview: String = reasoning.chars().take(REASONING_PREVIEW_CHARS).collect();
        debug!(reasoning = %preview, "model reasoning");
    }

    let non_blank = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
    non_blank(message.content)
        .or_else(|| non_blank(message.reasoning_content))
        .ok_or_else(|| LlmError::Protocol("no content in response message".to_string()))
}

/// Chat-completions client holding one session's transcript.
#[derive(Debug)]
pub struct CompletionClient {
    api_key: String,
    config: ClientConfig,
    http: reqwest::Client,
    transcript: Transcript,
}

impl CompletionClient {
    /// Create a client.
    ///
    /// The credential comes from `api_key` or, failing that, from
    /// `OPENROUTER_API_KEY`. A missing credential is a configuration error.
    pub fn new(api_key: Option<String>, config: ClientConfig) -> Result<Self> {
        let api_key = api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Configuration(format!(
                    "API key not found; set {API_KEY_ENV} or api_key in .reel/config"
                ))
            })?;

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            config,
            http,
            transcript: Transcript::new(),
        })
    }

    /// Create a client from session configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.api_key.clone(), ClientConfig::from_config(config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The conversation so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Plan an animation script (first phase of two-phase generation).
    ///
    /// The script conversation is not kept; only its result seeds the code
    /// transcript.
    pub async fn generate_script(&self, user_request: &str, context: Option<&str>) -> Result<String> {
        let messages = [
            Message::system(SCRIPT_SYSTEM_PROMPT),
            Message::user(build_script_prompt(user_request, context)),
        ];
        let script = self.complete(&messages, true).await?;
        Ok(script.trim().to_string())
    }

    /// Ask for the first candidate source of a session.
    ///
    /// Replaces any previous transcript.
    pub async fn request_initial_code(
        &mut self,
        user_request: &str,
        context: Option<&str>,
    ) -> Result<String> {
        let system = code_system_prompt(&self.config.scene_class);
        let transcript = if self.config.two_phase {
            info!(model = %self.config.model, "planning script");
            let script = self.generate_script(user_request, context).await?;
            info!(
                script_chars = script.len(),
                preview = %script_preview(&script),
                "script planned"
            );
            Transcript::seeded(system, build_code_prompt(&script))
        } else {
            Transcript::seeded(system, build_user_prompt(user_request, context))
        };
        self.transcript = transcript;

        info!(model = %self.config.model, "requesting initial code");
        let raw = self.complete(self.transcript.messages(), false).await?;
        Ok(strip_code_fences(&raw))
    }

    /// Ask for a corrected version of `prior_code` given a render diagnostic.
    ///
    /// Sends the whole transcript so the model sees every earlier attempt.
    pub async fn request_fix(&mut self, prior_code: &str, diagnostic: &str) -> Result<String> {
        if self.transcript.is_empty() {
            return Err(LlmError::Sequence);
        }

        self.transcript.push(Message::assistant(prior_code));
        self.transcript.push(Message::user(build_fix_prompt(diagnostic)));

        info!(
            model = %self.config.model,
            transcript_len = self.transcript.len(),
            "requesting fix"
        );
        let raw = self.complete(self.transcript.messages(), false).await?;
        Ok(strip_code_fences(&raw))
    }

    fn build_request<'a>(&'a self, messages: &'a [Message], reasoning: bool) -> ChatRequest<'a> {
        let mut request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            reasoning: None,
            include_reasoning: None,
        };
        if reasoning {
            request.temperature = REASONING_TEMPERATURE;
            if self.config.supports_reasoning() {
                request.reasoning = Some(ReasoningParams { effort: "high" });
                request.include_reasoning = Some(true);
            }
        }
        request
    }

    /// Issue one completion call.
    async fn complete(&self, messages: &[Message], reasoning: bool) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = self.build_request(messages, reasoning);

        debug!(
            url = %url,
            message_count = messages.len(),
            reasoning = reasoning,
            "sending completion request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(LlmError::Transport {
                status: status.as_u16(),
                body,
            });
        }

        parse_completion(&body)
    }
}

/// Leading [`SCRIPT_PREVIEW_CHARS`] characters of `script`, on a char boundary.
fn script_preview(script: &str) -> &str {
    script
        .char_indices()
        .nth(SCRIPT_PREVIEW_CHARS)
        .map_or(script, |(i, _)| &script[..i])
}

impl CodeGenerator for CompletionClient {
    async fn request_initial_code(
        &mut self,
        user_request: &str,
        context: Option<&str>,
    ) -> Result<String> {
        CompletionClient::request_initial_code(self, user_request, context).await
    }

    async fn request_fix(&mut self, prior_code: &str, diagnostic: &str) -> Result<String> {
        CompletionClient::request_fix(self, prior_code, diagnostic).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(config: ClientConfig) -> CompletionClient {
        CompletionClient::new(Some("sk-test".to_string()), config).unwrap()
    }

    #[test]
    fn script_preview_cuts_long_scripts_on_char_boundary() {
        let short = "Scene 1: draw a circle.";
        assert_eq!(script_preview(short), short);

        let long = "é".repeat(SCRIPT_PREVIEW_CHARS + 40);
        let preview = script_preview(&long);
        assert_eq!(preview.chars().count(), SCRIPT_PREVIEW_CHARS);
        assert!(long.starts_with(preview));
    }

    #[test]
    fn new_rejects_blank_key() {
        let result = CompletionClient::new(Some("   ".to_string()), ClientConfig::default());
        if std::env::var(API_KEY_ENV).map_or(true, |k| k.trim().is_empty()) {
            assert!(matches!(result, Err(LlmError::Configuration(_))));
        }
    }

    #[test]
    fn new_starts_with_empty_transcript() {
        let client = test_client(ClientConfig::default());
        assert!(client.transcript().is_empty());
    }

    #[tokio::test]
    async fn request_fix_before_initial_is_sequence_error() {
        let mut client = test_client(ClientConfig::default());
        let result = client.request_fix("code", "error").await;
        assert!(matches!(result, Err(LlmError::Sequence)));
        assert!(client.transcript().is_empty());
    }

    #[test]
    fn parse_returns_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"print(1)"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "print(1)");
    }

    #[test]
    fn parse_empty_choices_is_protocol_error() {
        let result = parse_completion(r#"{"choices":[]}"#);
        assert!(matches!(result, Err(LlmError::Protocol(msg)) if msg.contains("empty")));
    }

    #[test]
    fn parse_missing_choices_is_protocol_error() {
        let result = parse_completion(r#"{"id":"gen-1"}"#);
        assert!(matches!(result, Err(LlmError::Protocol(_))));
    }

    #[test]
    fn parse_null_choice_is_protocol_error() {
        let result = parse_completion(r#"{"choices":[null]}"#);
        assert!(matches!(result, Err(LlmError::Protocol(_))));
    }

    #[test]
    fn parse_missing_message_is_protocol_error() {
        let result = parse_completion(r#"{"choices":[{"finish_reason":"stop"}]}"#);
        assert!(matches!(result, Err(LlmError::Protocol(_))));
    }

    #[test]
    fn parse_invalid_json_is_protocol_error() {
        let result = parse_completion("<html>bad gateway</html>");
        assert!(matches!(result, Err(LlmError::Protocol(_))));
    }

    #[test]
    fn parse_falls_back_to_reasoning_content() {
        let body = r#"{"choices":[{"message":{"content":null,"reasoning_content":"x = 1"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "x = 1");

        let body = r#"{"choices":[{"message":{"content":"  ","reasoning_content":"y = 2"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "y = 2");
    }

    #[test]
    fn parse_without_any_content_is_protocol_error() {
        let body = r#"{"choices":[{"message":{"content":null,"reasoning_content":""}}]}"#;
        assert!(matches!(parse_completion(body), Err(LlmError::Protocol(_))));
    }

    #[test]
    fn request_body_carries_model_messages_and_limits() {
        let client = test_client(ClientConfig {
            model: "xiaomi/mimo-v2-flash".to_string(),
            ..Default::default()
        });
        let messages = [Message::system("s"), Message::user("u")];
        let json = serde_json::to_value(client.build_request(&messages, false)).unwrap();

        assert_eq!(json["model"], "xiaomi/mimo-v2-flash");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["max_tokens"], 8192);
        assert!(json.get("reasoning").is_none());
        assert!(json.get("include_reasoning").is_none());
    }

    #[test]
    fn reasoning_params_only_for_supporting_models() {
        let messages = [Message::user("u")];

        let client = test_client(ClientConfig {
            model: "deepseek/deepseek-r1".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(client.build_request(&messages, true)).unwrap();
        assert_eq!(json["reasoning"]["effort"], "high");
        assert_eq!(json["include_reasoning"], true);
        assert!((json["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);

        let client = test_client(ClientConfig {
            model: "xiaomi/mimo-v2-flash".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(client.build_request(&messages, true)).unwrap();
        assert!(json.get("reasoning").is_none());
        assert!((json["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn opening_messages_follow_phase_mode() {
        let two_phase = ClientConfig {
            two_phase: true,
            ..Default::default()
        };
        let messages = opening_messages(&two_phase, "circles", Some("ctx"));
        assert_eq!(messages[0].content, SCRIPT_SYSTEM_PROMPT);
        assert!(messages[1].content.contains("script"));
        assert!(messages[1].content.ends_with("ctx"));

        let single = ClientConfig {
            two_phase: false,
            scene_class: "Intro".to_string(),
            ..Default::default()
        };
        let messages = opening_messages(&single, "circles", None);
        assert!(messages[0].content.contains("`Intro`"));
        assert!(messages[1].content.contains("circles"));
    }

    #[test]
    fn client_config_trims_base_url() {
        let config = Config {
            base_url: "http://localhost:9000/v1/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            ClientConfig::from_config(&config).base_url,
            "http://localhost:9000/v1"
        );
    }
}
