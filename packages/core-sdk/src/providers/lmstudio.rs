use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::models::{
    CaptionRequest, GenerationRequest, Operation, ProviderId, StructuredPromptDecomposition,
    VideoPromptVariation,
};

use super::chat_completions::{self, ChatTarget};
use super::{boxed, local_base_url, model_or, Adapter, AdapterFuture, CORE_CAPABILITIES};

pub const DEFAULT_BASE_URL: &str = "http://localhost:1234";
pub const DEFAULT_MODEL: &str = "lmstudio-community/Meta-Llama-3.1-8B-Instruct-GGUF";
const MAX_TOKENS: u32 = 1500;

/**
 * \brief 本地 LM Studio 服务，走 OpenAI 兼容接口，无鉴权。
 */
pub struct LmStudioAdapter {
    store: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl LmStudioAdapter {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
        }
    }

    fn target(&self) -> ChatTarget {
        let base = local_base_url(&self.store, ProviderId::LmStudio, DEFAULT_BASE_URL);
        ChatTarget {
            endpoint: format!("{}/v1/chat/completions", base),
            model: model_or(&self.store, ProviderId::LmStudio, DEFAULT_MODEL),
            api_key: None,
            json_object: false,
            max_tokens: Some(MAX_TOKENS),
        }
    }
}

impl Adapter for LmStudioAdapter {
    fn provider(&self) -> ProviderId {
        ProviderId::LmStudio
    }

    fn capabilities(&self) -> &'static [Operation] {
        CORE_CAPABILITIES
    }

    fn generate_variations<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        boxed(self.provider(), Operation::GenerateVariations, async move {
            chat_completions::generate_variations(&self.http, &self.target(), req).await
        })
    }

    fn caption_image<'a>(&'a self, req: &'a CaptionRequest) -> AdapterFuture<'a, Vec<String>> {
        boxed(self.provider(), Operation::CaptionImage, async move {
            chat_completions::caption_image(&self.http, &self.target(), req).await
        })
    }

    fn decompose_prompt<'a>(
        &'a self,
        prompt_text: &'a str,
    ) -> AdapterFuture<'a, StructuredPromptDecomposition> {
        boxed(self.provider(), Operation::DecomposePrompt, async move {
            chat_completions::decompose_prompt(&self.http, &self.target(), prompt_text).await
        })
    }
}
