pub mod chat_completions;
pub mod gemini;
pub mod lmstudio;
pub mod ollama;
pub mod openai;
pub mod qwen;

use std::future::Future;
use std::pin::Pin;

use crate::credentials::CredentialStore;
use crate::error::{ErrorKind, GenerationError};
use crate::models::{
    CaptionRequest, FinalComposeRequest, GenerationRequest, MotionRequest, Operation, ProviderId,
    ProviderSetting, StructuredPromptDecomposition, SubjectSceneRequest, VideoPromptVariation,
};
use crate::telemetry;

pub use gemini::GeminiAdapter;
pub use lmstudio::LmStudioAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use qwen::QwenAdapter;

/** \brief 适配器方法返回的装箱 Future，使 trait 可作为对象使用。 */
pub type AdapterFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, GenerationError>> + Send + 'a>>;

/** \brief 所有后端都实现的操作。 */
pub const CORE_CAPABILITIES: &[Operation] = &Operation::CORE;

/** \brief 同时实现三段式流程的后端。 */
pub const FULL_CAPABILITIES: &[Operation] = &[
    Operation::GenerateVariations,
    Operation::CaptionImage,
    Operation::DecomposePrompt,
    Operation::DescribeSubjectAndScene,
    Operation::DescribeMotion,
    Operation::ComposeFinal,
];

/**
 * \brief 单个生成后端：把领域请求翻译成该后端的 HTTP 调用，并把响应还原为领域结果。
 * \details 三段式流程是可选能力，默认实现返回 `Unsupported`；路由层通过 `supports`
 * 在调用前决定是否回退。
 */
pub trait Adapter: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn capabilities(&self) -> &'static [Operation];

    fn supports(&self, op: Operation) -> bool {
        self.capabilities().contains(&op)
    }

    fn generate_variations<'a>(
        &'a self,
        req: &'a GenerationRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>>;

    fn caption_image<'a>(&'a self, req: &'a CaptionRequest) -> AdapterFuture<'a, Vec<String>>;

    fn decompose_prompt<'a>(
        &'a self,
        prompt_text: &'a str,
    ) -> AdapterFuture<'a, StructuredPromptDecomposition>;

    fn describe_subject_and_scene<'a>(
        &'a self,
        _req: &'a SubjectSceneRequest,
    ) -> AdapterFuture<'a, String> {
        unsupported(self.provider(), Operation::DescribeSubjectAndScene)
    }

    fn describe_motion<'a>(&'a self, _req: &'a MotionRequest) -> AdapterFuture<'a, String> {
        unsupported(self.provider(), Operation::DescribeMotion)
    }

    fn compose_final<'a>(
        &'a self,
        _req: &'a FinalComposeRequest,
    ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
        unsupported(self.provider(), Operation::ComposeFinal)
    }
}

fn unsupported<'a, T: Send + 'a>(provider: ProviderId, op: Operation) -> AdapterFuture<'a, T> {
    Box::pin(async move { Err(GenerationError::new(provider, op, ErrorKind::Unsupported)) })
}

/**
 * \brief 把内部的 `ErrorKind` 结果包装为带后端/操作信息的 `GenerationError`，并记录失败。
 */
pub(crate) fn boxed<'a, T, F>(provider: ProviderId, op: Operation, fut: F) -> AdapterFuture<'a, T>
where
    T: Send + 'a,
    F: Future<Output = Result<T, ErrorKind>> + Send + 'a,
{
    Box::pin(async move {
        fut.await.map_err(|kind| {
            let err = GenerationError::new(provider, op, kind);
            telemetry::log_error("provider", &err.to_string());
            err
        })
    })
}

/**
 * \brief 读取云端后端的密钥；缺失时返回 `Configuration`，调用方据此在发请求前失败。
 */
pub(crate) fn require_api_key(store: &CredentialStore, id: ProviderId) -> Result<String, ErrorKind> {
    store
        .get(id)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ErrorKind::Configuration {
            key: id.credential_key(),
        })
}

/** \brief 模型名：优先使用 `<PROVIDER>_MODEL` 配置。 */
pub(crate) fn model_or(store: &CredentialStore, id: ProviderId, default: &str) -> String {
    store
        .get_setting(id, ProviderSetting::Model)
        .unwrap_or_else(|| default.to_string())
}

/** \brief 本地服务地址：凭据为空时使用默认地址。 */
pub(crate) fn local_base_url(store: &CredentialStore, id: ProviderId, default: &str) -> String {
    store
        .get(id)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
