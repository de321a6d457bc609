use std::sync::Arc;

use serde_json::{json, Value};

use crate::credentials::CredentialStore;
use crate::error::ErrorKind;
use crate::llm::{normalize_gemini_base, post_json, RawEnvelope};
use crate::models::{
    CaptionRequest, FinalComposeRequest, GenerationRequest, MotionRequest, Operation, ProviderId,
    ProviderSetting, StructuredPromptDecomposition, SubjectSceneRequest, VideoPromptVariation,
};
use crate::normalizer::parse_strict;
use crate::prompts;
use crate::shape;

use super::{boxed, model_or, require_api_key, Adapter, AdapterFuture, FULL_CAPABILITIES};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

fn variations_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "prompt": { "type": "STRING" }
            },
            "required": ["title", "prompt"]
        }
    })
}

fn captions_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

fn decomposition_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "scene_description": { "type": "STRING" },
            "visual_style": { "type": "STRING" },
            "protagonist_action": { "type": "STRING" },
            "camera_angle": { "type": "STRING" },
            "camera_movement": { "type": "STRING" },
            "lighting_details": { "type": "STRING" },
            "additional_keywords": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": [
            "scene_description",
            "visual_style",
            "protagonist_action",
            "camera_angle",
            "camera_movement",
            "lighting_details"
        ]
    })
}

/**
 * \brief Google Gemini `generateContent` 后端。
 * \details 通过 responseSchema 约束输出结构，因此响应按严格 JSON 解析，不做容错修复。
 * 密钥以 `key` 查询参数传递；`GEMINI_BASE_URL` 可覆盖服务地址。
 */
pub struct GeminiAdapter {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
        }
    }

    async fn generate(
        &self,
        system: Option<&str>,
        parts: Vec<Value>,
        generation_config: Value,
    ) -> Result<String, ErrorKind> {
        let api_key = require_api_key(&self.store, ProviderId::Gemini)?;
        let base = self
            .store
            .get_setting(ProviderId::Gemini, ProviderSetting::BaseUrl)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = model_or(&self.store, ProviderId::Gemini, DEFAULT_MODEL);
        let url = format!(
            "{}/models/{}:generateContent",
            normalize_gemini_base(&base),
            model
        );

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config
        });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }

        let builder = self.http.post(url).query(&[("key", api_key.as_str())]);
        let value = post_json(builder, &body).await?;
        RawEnvelope::gemini(value)?.into_text()
    }

    async fn generate_json(
        &self,
        system: Option<&str>,
        parts: Vec<Value>,
        temperature: f32,
        schema: Value,
        max_output_tokens: Option<u32>,
    ) -> Result<Value, ErrorKind> {
        let mut config = json!({
            "temperature": temperature,
            "responseMimeType": "application/json",
            "responseSchema": schema
        });
        if let Some(n) = max_output_tokens {
            config["maxOutputTokens"] = json!(n);
        }
        let text = self.generate(system, parts, config).await?;
        Ok(parse_strict(&text)?)
    }

    async fn generate_text(
        &self,
        system: &str,
        prompt: String,
        max_output_tokens: u32,
    ) -> Result<String, ErrorKind> {
        let config = json!({
            "temperature": prompts::STAGE_TEMPERATURE,
            "maxOutputTokens": max_output_tokens
        });
        let text = self
            .generate(Some(system), vec![json!({ "text": prompt })], config)
            .await?;
        Ok(text.trim().to_string())
    }

    async fn variations(
        &self,
        req: &GenerationRequest,
    ) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
        let system = prompts::variation_system(req.is_nsfw, false);
        let value = self
            .generate_json(
                Some(&system),
                vec![json!({ "text": prompts::variation_prompt(req) })],
                prompts::variation_temperature(req.is_nsfw),
                variations_schema(),
                None,
            )
            .await?;
        shape::variations_from_value(value)
    }

    async fn captions(&self, req: &CaptionRequest) -> Result<Vec<String>, ErrorKind> {
        let parts = vec![
            json!({ "inlineData": { "mimeType": req.mime_type, "data": req.image_data } }),
            json!({ "text": prompts::CAPTION_PROMPT }),
        ];
        let value = self
            .generate_json(
                None,
                parts,
                prompts::CAPTION_TEMPERATURE,
                captions_schema(),
                None,
            )
            .await?;
        shape::captions_from_value(value)
    }

    async fn decompose(
        &self,
        prompt_text: &str,
    ) -> Result<StructuredPromptDecomposition, ErrorKind> {
        let value = self
            .generate_json(
                None,
                vec![json!({ "text": prompts::decompose_prompt(prompt_text) })],
                prompts::DECOMPOSE_TEMPERATURE,
                decomposition_schema(),
                None,
            )
            .await?;
        shape::decomposition_from_value(value)
    }

    async fn compose(
        &self,
        req: &FinalComposeRequest,
    ) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
        let value = self
            .generate_json(
                Some(prompts::final_system(req.is_nsfw)),
                vec![json!({ "text": prompts::final_prompt(req) })],
                prompts::variation_temperature(req.is_nsfw),
                variations_schema(),
                Some(1500),
            )
            .await?;
        shape::variations_from_value(value)
    }
}

impl Adapter for GeminiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn capabilities(&self) -> &'static [Operation] {
        FULL_CAPABILITIES
    }

    fn generate_variations<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        boxed(self.provider(), Operation::GenerateVariations, self.variations(req))
    }

    fn caption_image<'a>(&'a self, req: &'a CaptionRequest) -> AdapterFuture<'a, Vec<String>> {
        boxed(self.provider(), Operation::CaptionImage, self.captions(req))
    }

    fn decompose_prompt<'a>(
        &'a self,
        prompt_text: &'a str,
    ) -> AdapterFuture<'a, StructuredPromptDecomposition> {
        boxed(self.provider(), Operation::DecomposePrompt, self.decompose(prompt_text))
    }

    fn describe_subject_and_scene<'a>(
        &'a self,
        req: &'a SubjectSceneRequest,
    ) -> AdapterFuture<'a, String> {
        boxed(
            self.provider(),
            Operation::DescribeSubjectAndScene,
            self.generate_text(
                prompts::subject_scene_system(req.is_nsfw),
                prompts::subject_scene_prompt(req),
                300,
            ),
        )
    }

    fn describe_motion<'a>(&'a self, req: &'a MotionRequest) -> AdapterFuture<'a, String> {
        boxed(
            self.provider(),
            Operation::DescribeMotion,
            self.generate_text(
                prompts::motion_system(req.is_nsfw),
                prompts::motion_prompt(req),
                250,
            ),
        )
    }

    fn compose_final<'a>(
        &'a self,
        req: &'a FinalComposeRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        boxed(self.provider(), Operation::ComposeFinal, self.compose(req))
    }
}
