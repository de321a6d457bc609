use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::error::ErrorKind;
use crate::models::{
    CaptionRequest, FinalComposeRequest, GenerationRequest, Message, MotionRequest, Operation,
    ProviderId, StructuredPromptDecomposition, SubjectSceneRequest, VideoPromptVariation,
};
use crate::normalizer::extract_json;
use crate::prompts;
use crate::shape;

use super::chat_completions::{self, ChatTarget, CLOUD_MAX_TOKENS};
use super::{boxed, model_or, require_api_key, Adapter, AdapterFuture, FULL_CAPABILITIES};

pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/**
 * \brief OpenAI chat-completions 后端，支持三段式流程。
 */
pub struct OpenAiAdapter {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    endpoint: String,
}

impl OpenAiAdapter {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self::with_endpoint(store, OPENAI_ENDPOINT)
    }

    pub fn with_endpoint(store: Arc<CredentialStore>, endpoint: impl Into<String>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn target(&self) -> Result<ChatTarget, ErrorKind> {
        let api_key = require_api_key(&self.store, ProviderId::OpenAi)?;
        Ok(ChatTarget {
            endpoint: self.endpoint.clone(),
            model: model_or(&self.store, ProviderId::OpenAi, DEFAULT_MODEL),
            api_key: Some(api_key),
            json_object: true,
            max_tokens: Some(CLOUD_MAX_TOKENS),
        })
    }

    async fn compose(
        &self,
        req: &FinalComposeRequest,
    ) -> Result<Vec<VideoPromptVariation>, ErrorKind> {
        let target = ChatTarget {
            max_tokens: Some(1500),
            ..self.target()?
        };
        let messages = vec![
            Message::system(prompts::final_system(req.is_nsfw)),
            Message::user(prompts::final_prompt(req)),
        ];
        let text = chat_completions::complete(
            &self.http,
            &target,
            messages,
            prompts::variation_temperature(req.is_nsfw),
            true,
        )
        .await?;
        shape::variations_from_value(extract_json(&text)?)
    }
}

impl Adapter for OpenAiAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn capabilities(&self) -> &'static [Operation] {
        FULL_CAPABILITIES
    }

    fn generate_variations<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        boxed(self.provider(), Operation::GenerateVariations, async move {
            let target = self.target()?;
            chat_completions::generate_variations(&self.http, &target, req).await
        })
    }

    fn caption_image<'a>(&'a self, req: &'a CaptionRequest) -> AdapterFuture<'a, Vec<String>> {
        boxed(self.provider(), Operation::CaptionImage, async move {
            let target = self.target()?;
            chat_completions::caption_image(&self.http, &target, req).await
        })
    }

    fn decompose_prompt<'a>(
        &'a self,
        prompt_text: &'a str,
    ) -> AdapterFuture<'a, StructuredPromptDecomposition> {
        boxed(self.provider(), Operation::DecomposePrompt, async move {
            let target = self.target()?;
            chat_completions::decompose_prompt(&self.http, &target, prompt_text).await
        })
    }

    fn describe_subject_and_scene<'a>(
        &'a self,
        req: &'a SubjectSceneRequest,
    ) -> AdapterFuture<'a, String> {
        boxed(self.provider(), Operation::DescribeSubjectAndScene, async move {
            let target = self.target()?;
            chat_completions::complete_text(
                &self.http,
                &target,
                prompts::subject_scene_system(req.is_nsfw),
                prompts::subject_scene_prompt(req),
                300,
            )
            .await
        })
    }

    fn describe_motion<'a>(&'a self, req: &'a MotionRequest) -> AdapterFuture<'a, String> {
        boxed(self.provider(), Operation::DescribeMotion, async move {
            let target = self.target()?;
            chat_completions::complete_text(
                &self.http,
                &target,
                prompts::motion_system(req.is_nsfw),
                prompts::motion_prompt(req),
                250,
            )
            .await
        })
    }

    fn compose_final<'a>(
        &'a self,
        req: &'a FinalComposeRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        boxed(self.provider(), Operation::ComposeFinal, self.compose(req))
    }
}
