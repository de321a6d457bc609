//! OpenAI 兼容的 chat-completions 调用，OpenAI、Qwen 与 LM Studio 共用。

use serde_json::{json, Value};

use crate::error::ErrorKind;
use crate::llm::{post_json, with_bearer, RawEnvelope};
use crate::models::{
    CaptionRequest, GenerationRequest, Message, StructuredPromptDecomposition,
    VideoPromptVariation,
};
use crate::normalizer::extract_json;
use crate::prompts;
use crate::shape;

/** \brief 云端 chat-completions 后端核心操作的 max_tokens。 */
pub const CLOUD_MAX_TOKENS: u32 = 1024;

/**
 * \brief 一次调用的目标：地址、模型、可选密钥与 JSON 输出提示。
 */
#[derive(Debug, Clone)]
pub struct ChatTarget {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /** \brief 是否附带 `response_format: {type: json_object}` */
    pub json_object: bool,
    /** \brief 生成类操作的 max_tokens 上限 */
    pub max_tokens: Option<u32>,
}

/**
 * \brief 发送一组消息并取回纯文本回复。
 */
pub async fn complete(
    http: &reqwest::Client,
    target: &ChatTarget,
    messages: Vec<Message>,
    temperature: f32,
    want_json: bool,
) -> Result<String, ErrorKind> {
    let mut body = json!({
        "model": target.model,
        "messages": messages,
        "temperature": temperature,
        "stream": false
    });
    if want_json && target.json_object {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(max_tokens) = target.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    let mut builder = http.post(&target.endpoint);
    if let Some(key) = target.api_key.as_deref() {
        builder = with_bearer(builder, key);
    }
    let value: Value = post_json(builder, &body).await?;
    RawEnvelope::chat_completions(value)?.into_text()
}

pub async fn generate_variations(
    http: &reqwest::Client,
    target: &ChatTarget,
    req: &GenerationRequest,
) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
    let messages = vec![
        Message::system(prompts::variation_system(req.is_nsfw, true)),
        Message::user(prompts::variation_prompt(req)),
    ];
    let text = complete(
        http,
        target,
        messages,
        prompts::variation_temperature(req.is_nsfw),
        true,
    )
    .await?;
    shape::variations_from_value(extract_json(&text)?)
}

pub async fn caption_image(
    http: &reqwest::Client,
    target: &ChatTarget,
    req: &CaptionRequest,
) -> Result<Vec<String>, ErrorKind> {
    let messages = vec![
        Message::system(prompts::CAPTION_SYSTEM),
        Message::user_with_image(prompts::CAPTION_PROMPT, req.data_url()),
    ];
    let text = complete(http, target, messages, prompts::CAPTION_TEMPERATURE, true).await?;
    shape::captions_from_value(extract_json(&text)?)
}

pub async fn decompose_prompt(
    http: &reqwest::Client,
    target: &ChatTarget,
    prompt_text: &str,
) -> Result<StructuredPromptDecomposition, ErrorKind> {
    let messages = vec![
        Message::system(prompts::DECOMPOSE_SYSTEM),
        Message::user(prompts::decompose_prompt(prompt_text)),
    ];
    let text = complete(http, target, messages, prompts::DECOMPOSE_TEMPERATURE, true).await?;
    shape::decomposition_from_value(extract_json(&text)?)
}

/** \brief 纯文本阶段的输出（去除首尾空白）。 */
pub async fn complete_text(
    http: &reqwest::Client,
    target: &ChatTarget,
    system: &str,
    user: String,
    max_tokens: u32,
) -> Result<String, ErrorKind> {
    let target = ChatTarget {
        max_tokens: Some(max_tokens),
        ..target.clone()
    };
    let messages = vec![Message::system(system), Message::user(user)];
    let text = complete(http, &target, messages, prompts::STAGE_TEMPERATURE, false).await?;
    Ok(text.trim().to_string())
}
