use super::{ChatMessage, ChatRequest, JsonSchemaFormat, LLMConfig, LLMProvider, LLMResponse, LLM};
use crate::error::IngestError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const LMSTUDIO_CHAT_URL: &str = "http://localhost:1234/v1/chat/completions";

/// OpenAI-style `response_format` body
#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaFormat,
}

impl From<JsonSchemaFormat> for ResponseFormat {
    fn from(json_schema: JsonSchemaFormat) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema,
        }
    }
}

/// Request body shared by OpenAI and OpenAI-compatible local servers
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    total_tokens: u32,
}

/// Reasoning models take `max_completion_tokens` and reject a custom temperature
fn uses_max_completion_tokens(model: &str) -> bool {
    model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
        || model.starts_with("gpt-5")
        || model.contains("-o1")
        || model.contains("-o3")
}

fn chat_completion_body(config: &LLMConfig, request: ChatRequest) -> ChatCompletionRequest {
    let budget = request.max_tokens.unwrap_or(config.max_tokens);
    let reasoning = uses_max_completion_tokens(&config.model);

    ChatCompletionRequest {
        model: config.model.clone(),
        messages: request.messages,
        max_tokens: (!reasoning).then_some(budget),
        max_completion_tokens: reasoning.then_some(budget),
        temperature: (!reasoning).then_some(config.temperature),
        response_format: request.response_format.map(ResponseFormat::from),
    }
}

async fn send_chat_completion(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    api_key: Option<&str>,
    body: &ChatCompletionRequest,
) -> Result<LLMResponse> {
    debug!("Sending request to {} at {}", label, url);

    let mut builder = client.post(url).json(body);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(api_error(label, status, &text));
    }

    let parsed: ChatCompletionResponse = response.json().await?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No response from {}", label))?
        .message
        .content
        .unwrap_or_default();

    Ok(LLMResponse {
        content,
        tokens_used: parsed.usage.map(|u| u.total_tokens),
    })
}

/// Rejected credentials end the run; other statuses are per-attempt failures
fn api_error(label: &str, status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return IngestError::Backend(format!(
            "{} rejected the credential ({}): {}",
            label, status, body
        ))
        .into();
    }
    anyhow!("{} API error {}: {}", label, status, body)
}

fn build_client(config: &LLMConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?)
}

/// LMStudio provider implementation
pub struct LMStudioProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl LMStudioProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LLM for LMStudioProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        let endpoint = self.config.endpoint.as_deref().unwrap_or(LMSTUDIO_CHAT_URL);
        let body = chat_completion_body(&self.config, request);
        send_chat_completion(&self.client, "LMStudio", endpoint, None, &body).await
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(anyhow!("OpenAI API key required"));
        }
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;
        let url = self.config.endpoint.as_deref().unwrap_or(OPENAI_CHAT_URL);
        let body = chat_completion_body(&self.config, request);
        send_chat_completion(&self.client, "OpenAI", url, Some(api_key), &body).await
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}

/// Gemini provider implementation
pub struct GeminiProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

/// Rewrite a JSON schema into the OpenAPI subset Gemini accepts.
///
/// `anyOf: [{type: T}, {type: "null"}]` becomes `{type: T, nullable: true}` and
/// `additionalProperties` is dropped.
fn to_gemini_schema(schema: &serde_json::Value) -> serde_json::Value {
    use serde_json::{Map, Value};

    let Value::Object(map) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in map {
        match key.as_str() {
            "additionalProperties" => {}
            "anyOf" => {
                let variants = value.as_array().cloned().unwrap_or_default();
                let nullable = variants.iter().any(|v| v["type"] == "null");
                let concrete: Vec<&Value> = variants.iter().filter(|v| v["type"] != "null").collect();
                if concrete.len() == 1 {
                    if let Value::Object(inner) = to_gemini_schema(concrete[0]) {
                        out.extend(inner);
                    }
                    if nullable {
                        out.insert("nullable".to_string(), Value::Bool(true));
                    }
                } else {
                    out.insert(key.clone(), value.clone());
                }
            }
            "properties" => {
                let props = value
                    .as_object()
                    .map(|props| {
                        props
                            .iter()
                            .map(|(name, prop)| (name.clone(), to_gemini_schema(prop)))
                            .collect::<Map<_, _>>()
                    })
                    .unwrap_or_default();
                out.insert(key.clone(), Value::Object(props));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

impl GeminiProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(anyhow!("Gemini API key required"));
        }
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_request(&self, request: ChatRequest) -> GeminiRequest {
        let (system, conversation): (Vec<ChatMessage>, Vec<ChatMessage>) = request
            .messages
            .into_iter()
            .partition(|msg| msg.role == "system");

        let system_instruction = (!system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: system.into_iter().map(|msg| GeminiPart { text: msg.content }).collect(),
        });

        let contents = conversation
            .into_iter()
            .map(|msg| GeminiContent {
                role: Some(if msg.role == "assistant" { "model" } else { "user" }.to_string()),
                parts: vec![GeminiPart { text: msg.content }],
            })
            .collect();

        let schema = request.response_format.map(|format| to_gemini_schema(&format.schema));

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
                temperature: self.config.temperature,
                response_mime_type: schema.as_ref().map(|_| "application/json".to_string()),
                response_schema: schema,
            },
        }
    }
}

#[async_trait]
impl LLM for GeminiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("Gemini API key not configured"))?;

        let body = self.build_request(request);
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model, api_key
        );

        debug!("Sending request to Gemini API");

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(api_error("Gemini", status, &text));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let content = gemini_response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .ok_or_else(|| anyhow!("No response from Gemini"))?;

        Ok(LLMResponse {
            content,
            tokens_used: gemini_response.usage_metadata.map(|u| u.total_token_count),
        })
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::Gemini
    }
}
