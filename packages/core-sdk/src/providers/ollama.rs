use std::sync::Arc;

use serde_json::{json, Value};

use crate::credentials::CredentialStore;
use crate::error::ErrorKind;
use crate::llm::{post_json, RawEnvelope};
use crate::models::{
    CaptionRequest, FinalComposeRequest, GenerationRequest, MotionRequest, Operation, ProviderId,
    StructuredPromptDecomposition, SubjectSceneRequest, VideoPromptVariation,
};
use crate::normalizer::extract_json;
use crate::prompts;
use crate::shape;

use super::{boxed, local_base_url, model_or, Adapter, AdapterFuture, FULL_CAPABILITIES};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-vl:32b";

/** \brief `/api/generate` 的单次调用参数。 */
struct GenerateCall<'a> {
    system: &'a str,
    prompt: String,
    images: Option<&'a str>,
    temperature: f32,
    num_predict: Option<u32>,
}

/**
 * \brief 本地 Ollama 服务，使用 `/api/generate` 非流式接口。
 */
pub struct OllamaAdapter {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
        }
    }

    async fn generate(&self, call: GenerateCall<'_>) -> Result<String, ErrorKind> {
        let base = local_base_url(&self.store, ProviderId::Ollama, DEFAULT_BASE_URL);
        let mut options = json!({ "temperature": call.temperature });
        if let Some(n) = call.num_predict {
            options["num_predict"] = json!(n);
        }
        let mut body = json!({
            "model": model_or(&self.store, ProviderId::Ollama, DEFAULT_MODEL),
            "system": call.system,
            "prompt": call.prompt,
            "stream": false,
            "options": options
        });
        if let Some(image) = call.images {
            body["images"] = json!([image]);
        }

        let builder = self.http.post(format!("{}/api/generate", base));
        let value: Value = post_json(builder, &body).await?;
        RawEnvelope::ollama(value)?.into_text()
    }

    async fn variations(
        &self,
        req: &GenerationRequest,
    ) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
        let system = prompts::variation_system(req.is_nsfw, true);
        let text = self
            .generate(GenerateCall {
                system: &system,
                prompt: prompts::variation_prompt(req),
                images: None,
                temperature: prompts::variation_temperature(req.is_nsfw),
                num_predict: None,
            })
            .await?;
        shape::variations_from_value(extract_json(&text)?)
    }

    async fn captions(&self, req: &CaptionRequest) -> Result<Vec<String>, ErrorKind> {
        let text = self
            .generate(GenerateCall {
                system: prompts::CAPTION_SYSTEM,
                prompt: prompts::CAPTION_PROMPT.to_string(),
                images: Some(req.image_data.as_str()),
                temperature: prompts::CAPTION_TEMPERATURE,
                num_predict: None,
            })
            .await?;
        shape::captions_from_value(extract_json(&text)?)
    }

    async fn decompose(
        &self,
        prompt_text: &str,
    ) -> Result<StructuredPromptDecomposition, ErrorKind> {
        let text = self
            .generate(GenerateCall {
                system: prompts::DECOMPOSE_SYSTEM,
                prompt: prompts::decompose_prompt(prompt_text),
                images: None,
                temperature: prompts::DECOMPOSE_TEMPERATURE,
                num_predict: None,
            })
            .await?;
        shape::decomposition_from_value(extract_json(&text)?)
    }

    async fn text_stage(
        &self,
        system: &str,
        prompt: String,
        num_predict: u32,
    ) -> Result<String, ErrorKind> {
        let text = self
            .generate(GenerateCall {
                system,
                prompt,
                images: None,
                temperature: prompts::STAGE_TEMPERATURE,
                num_predict: Some(num_predict),
            })
            .await?;
        Ok(text.trim().to_string())
    }

    async fn compose(
        &self,
        req: &FinalComposeRequest,
    ) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
        let text = self
            .generate(GenerateCall {
                system: prompts::final_system(req.is_nsfw),
                prompt: prompts::final_prompt(req),
                images: None,
                temperature: prompts::variation_temperature(req.is_nsfw),
                num_predict: Some(1500),
            })
            .await?;
        shape::variations_from_value(extract_json(&text)?)
    }
}

impl Adapter for OllamaAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Ollama
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
            self.text_stage(
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
            self.text_stage(
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
