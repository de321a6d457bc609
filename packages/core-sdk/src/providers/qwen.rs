use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::error::ErrorKind;
use crate::models::{
    CaptionRequest, GenerationRequest, Operation, ProviderId, StructuredPromptDecomposition,
    VideoPromptVariation,
};

use super::chat_completions::{self, ChatTarget, CLOUD_MAX_TOKENS};
use super::{boxed, model_or, require_api_key, Adapter, AdapterFuture, CORE_CAPABILITIES};

pub const QWEN_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "qwen2.5-vl-32b-instruct";

/**
 * \brief 阿里云 DashScope 的 OpenAI 兼容模式。
 */
pub struct QwenAdapter {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
    endpoint: String,
}

impl QwenAdapter {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self::with_endpoint(store, QWEN_ENDPOINT)
    }

    pub fn with_endpoint(store: Arc<CredentialStore>, endpoint: impl Into<String>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn target(&self) -> Result<ChatTarget, ErrorKind> {
        let api_key = require_api_key(&self.store, ProviderId::Qwen)?;
        Ok(ChatTarget {
            endpoint: self.endpoint.clone(),
            model: model_or(&self.store, ProviderId::Qwen, DEFAULT_MODEL),
            api_key: Some(api_key),
            json_object: true,
            max_tokens: Some(CLOUD_MAX_TOKENS),
        })
    }
}

impl Adapter for QwenAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::Qwen
    }

    fn capabilities(&self) -> &'static [Operation] {
        CORE_CAPABILITIES
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
}
