use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{excerpt, ErrorKind, BODY_EXCERPT_LEN};
use crate::normalizer::parse_strict;

/**
 * \brief 发送 JSON POST 并返回解析后的响应体。
 * \details 非 2xx 状态转为 `Transport`（附带截断的响应体），空响应体转为 `EmptyResponse`，
 * 非 JSON 响应体转为 `Parse`。
 */
pub async fn post_json(builder: RequestBuilder, body: &Value) -> Result<Value, ErrorKind> {
    let resp = builder
        .header(CONTENT_TYPE, "application/json")
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ErrorKind::Transport {
            status: Some(status.as_u16()),
            body: excerpt(&text, BODY_EXCERPT_LEN),
        });
    }
    if text.trim().is_empty() {
        return Err(ErrorKind::EmptyResponse);
    }
    Ok(parse_strict(&text)?)
}

/** \brief 附加 `Authorization: Bearer <key>` 头。 */
pub fn with_bearer(builder: RequestBuilder, api_key: &str) -> RequestBuilder {
    builder.header(AUTHORIZATION, format!("Bearer {}", api_key))
}

/**
 * \brief 各后端的原始响应信封。
 */
#[derive(Debug, Clone)]
pub enum RawEnvelope {
    Gemini(GeminiResponse),
    ChatCompletions(ChatCompletionResponse),
    Ollama(OllamaGenerateResponse),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiPart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

/** \brief content 可能是字符串，也可能是 `[{type:"text", text:..}]` 多段数组。 */
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaGenerateResponse {
    #[serde(default)]
    pub response: Option<String>,
}

impl RawEnvelope {
    pub fn gemini(value: Value) -> Result<Self, ErrorKind> {
        Ok(RawEnvelope::Gemini(decode(value)?))
    }

    pub fn chat_completions(value: Value) -> Result<Self, ErrorKind> {
        Ok(RawEnvelope::ChatCompletions(decode(value)?))
    }

    pub fn ollama(value: Value) -> Result<Self, ErrorKind> {
        Ok(RawEnvelope::Ollama(decode(value)?))
    }

    /**
     * \brief 取出模型生成的文本；为空（或只有空白）时返回 `EmptyResponse`。
     */
    pub fn into_text(self) -> Result<String, ErrorKind> {
        let text = match self {
            RawEnvelope::Gemini(resp) => extract_gemini_content(resp),
            RawEnvelope::ChatCompletions(resp) => extract_chat_content(resp),
            RawEnvelope::Ollama(resp) => resp.response.unwrap_or_default(),
        };
        if text.trim().is_empty() {
            Err(ErrorKind::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ErrorKind> {
    serde_json::from_value(value)
        .map_err(|e| ErrorKind::Shape(format!("unexpected response envelope: {}", e)))
}

fn extract_gemini_content(resp: GeminiResponse) -> String {
    resp.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn extract_chat_content(resp: ChatCompletionResponse) -> String {
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content);
    match content {
        Some(Value::String(s)) => s,
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/**
 * \brief 补全 Gemini 基础地址的版本段，例如 `https://host` -> `https://host/v1beta`。
 */
pub fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
