use std::collections::HashMap;
use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::error::{ErrorKind, GenerationError};
use crate::models::{
    CaptionRequest, FinalComposeRequest, GenerationRequest, MotionRequest, Operation, ProviderId,
    StructuredPromptDecomposition, SubjectSceneRequest, VideoPromptVariation,
};
use crate::providers::{
    Adapter, GeminiAdapter, LmStudioAdapter, OllamaAdapter, OpenAiAdapter, QwenAdapter,
};
use crate::telemetry;

/**
 * \brief 一次路由决策：调用方请求的后端、实际执行的后端，以及是否发生回退。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub requested: ProviderId,
    pub resolved: ProviderId,
    pub fallback: bool,
}

/**
 * \brief 按调用方给出的 Provider 分发请求，能力缺失时回退到默认 Provider。
 * \details 路由器本身不保存“当前后端”，每次调用都显式传入 Provider。
 */
pub struct Router {
    adapters: HashMap<ProviderId, Arc<dyn Adapter>>,
    store: Arc<CredentialStore>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /** \brief 空路由器，凭据存储为进程内存储。 */
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            store: Arc::new(CredentialStore::in_memory()),
        }
    }

    pub fn with_store(mut self, store: Arc<CredentialStore>) -> Self {
        self.store = store;
        self
    }

    /** \brief 注册（或替换）某个 Provider 的适配器。 */
    pub fn register(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /**
     * \brief 装配全部内置适配器；anthropic/stability/perplexity 暂无适配器，调用时回退。
     */
    pub fn with_default_adapters(store: Arc<CredentialStore>) -> Self {
        Self::new()
            .with_store(store.clone())
            .register(Arc::new(GeminiAdapter::new(store.clone())))
            .register(Arc::new(OpenAiAdapter::new(store.clone())))
            .register(Arc::new(QwenAdapter::new(store.clone())))
            .register(Arc::new(OllamaAdapter::new(store.clone())))
            .register(Arc::new(LmStudioAdapter::new(store)))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn is_configured(&self, id: ProviderId) -> bool {
        self.store.is_configured(id)
    }

    /** \brief 该 Provider 已注册且其适配器实现了该操作。 */
    pub fn supports(&self, provider: ProviderId, op: Operation) -> bool {
        self.adapters
            .get(&provider)
            .map(|a| a.supports(op))
            .unwrap_or(false)
    }

    pub fn route(&self, provider: ProviderId, op: Operation) -> Route {
        if self.supports(provider, op) {
            Route {
                requested: provider,
                resolved: provider,
                fallback: false,
            }
        } else {
            Route {
                requested: provider,
                resolved: ProviderId::DEFAULT,
                fallback: provider != ProviderId::DEFAULT,
            }
        }
    }

    fn dispatch(
        &self,
        provider: ProviderId,
        op: Operation,
    ) -> Result<&Arc<dyn Adapter>, GenerationError> {
        let route = self.route(provider, op);
        let adapter = self
            .adapters
            .get(&route.resolved)
            .filter(|a| a.supports(op))
            .ok_or_else(|| GenerationError::new(provider, op, ErrorKind::Unsupported))?;
        if route.fallback {
            telemetry::warn_always(
                "router.fallback",
                &format!(
                    "{} is not available on {}, falling back to {}",
                    op, route.requested, route.resolved
                ),
            );
        }
        telemetry::log_event("router", &format!("{} -> {}", op, route.resolved));
        Ok(adapter)
    }

    pub async fn generate_variations(
        &self,
        provider: ProviderId,
        req: &GenerationRequest,
    ) -> Result<Vec<VideoPromptVariation>, GenerationError> {
        let op = Operation::GenerateVariations;
        validate_scene(provider, op, &req.scene)?;
        self.dispatch(provider, op)?.generate_variations(req).await
    }

    pub async fn caption_image(
        &self,
        provider: ProviderId,
        req: &CaptionRequest,
    ) -> Result<Vec<String>, GenerationError> {
        let op = Operation::CaptionImage;
        if req.image_data.trim().is_empty() || req.mime_type.trim().is_empty() {
            return Err(GenerationError::new(
                provider,
                op,
                ErrorKind::InvalidRequest("image data and MIME type are required".into()),
            ));
        }
        self.dispatch(provider, op)?.caption_image(req).await
    }

    pub async fn decompose_prompt(
        &self,
        provider: ProviderId,
        prompt_text: &str,
    ) -> Result<StructuredPromptDecomposition, GenerationError> {
        let op = Operation::DecomposePrompt;
        if prompt_text.trim().is_empty() {
            return Err(GenerationError::new(
                provider,
                op,
                ErrorKind::InvalidRequest("prompt text is empty".into()),
            ));
        }
        self.dispatch(provider, op)?.decompose_prompt(prompt_text).await
    }

    pub async fn describe_subject_and_scene(
        &self,
        provider: ProviderId,
        req: &SubjectSceneRequest,
    ) -> Result<String, GenerationError> {
        let op = Operation::DescribeSubjectAndScene;
        validate_scene(provider, op, &req.scene)?;
        self.dispatch(provider, op)?
            .describe_subject_and_scene(req)
            .await
    }

    pub async fn describe_motion(
        &self,
        provider: ProviderId,
        req: &MotionRequest,
    ) -> Result<String, GenerationError> {
        self.dispatch(provider, Operation::DescribeMotion)?
            .describe_motion(req)
            .await
    }

    pub async fn compose_final(
        &self,
        provider: ProviderId,
        req: &FinalComposeRequest,
    ) -> Result<Vec<VideoPromptVariation>, GenerationError> {
        self.dispatch(provider, Operation::ComposeFinal)?
            .compose_final(req)
            .await
    }

    /**
     * \brief 三段式生成：主体与场景 -> 动作 -> 镜头与成稿。每一段单独路由。
     */
    pub async fn generate_staged(
        &self,
        provider: ProviderId,
        req: &GenerationRequest,
    ) -> Result<Vec<VideoPromptVariation>, GenerationError> {
        let scene = self
            .describe_subject_and_scene(
                provider,
                &SubjectSceneRequest {
                    scene: req.scene.clone(),
                    style: req.style.clone(),
                    is_nsfw: req.is_nsfw,
                },
            )
            .await?;
        let motion = self
            .describe_motion(
                provider,
                &MotionRequest {
                    refined_scene: scene.clone(),
                    protagonist_action: req.protagonist_action.clone(),
                    is_nsfw: req.is_nsfw,
                },
            )
            .await?;
        self.compose_final(
            provider,
            &FinalComposeRequest {
                action_description: format!("{}, {}", scene, motion),
                camera_angle: req.camera_angle.clone(),
                camera_movement: req.camera_movement.clone(),
                lighting: req.lighting.clone(),
                camera_device: req.camera_device.clone(),
                is_nsfw: req.is_nsfw,
            },
        )
        .await
    }
}

fn validate_scene(provider: ProviderId, op: Operation, scene: &str) -> Result<(), GenerationError> {
    if scene.trim().is_empty() {
        return Err(GenerationError::new(
            provider,
            op,
            ErrorKind::InvalidRequest("scene must not be empty".into()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AdapterFuture, CORE_CAPABILITIES, FULL_CAPABILITIES};
    use std::sync::Mutex;

    /** \brief 记录被调用操作的桩适配器。 */
    struct StubAdapter {
        id: ProviderId,
        caps: &'static [Operation],
        calls: Mutex<Vec<Operation>>,
        captions: Vec<String>,
    }

    impl StubAdapter {
        fn new(id: ProviderId, caps: &'static [Operation]) -> Arc<Self> {
            Arc::new(Self {
                id,
                caps,
                calls: Mutex::new(Vec::new()),
                captions: vec![
                    "A chrome robot under neon rain".into(),
                    "Reflections ripple across a wet street".into(),
                    "Steam rises behind a lone figure".into(),
                ],
            })
        }

        fn record(&self, op: Operation) {
            self.calls.lock().unwrap().push(op);
        }

        fn calls(&self) -> Vec<Operation> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn variations(tag: &str) -> Vec<VideoPromptVariation> {
        (1..=3)
            .map(|i| VideoPromptVariation {
                title: format!("{} {}", tag, i),
                prompt: format!("{} prompt {}", tag, i),
            })
            .collect()
    }

    impl Adapter for StubAdapter {
        fn provider(&self) -> ProviderId {
            self.id
        }

        fn capabilities(&self) -> &'static [Operation] {
            self.caps
        }

        fn generate_variations<'a>(
            &'a self,
            req: &'a GenerationRequest,
        ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
            self.record(Operation::GenerateVariations);
            Box::pin(async move { Ok::<_, GenerationError>(variations(&req.style)) })
        }

        fn caption_image<'a>(&'a self, _req: &'a CaptionRequest) -> AdapterFuture<'a, Vec<String>> {
            self.record(Operation::CaptionImage);
            Box::pin(async move { Ok::<_, GenerationError>(self.captions.clone()) })
        }

        fn decompose_prompt<'a>(
            &'a self,
            _prompt_text: &'a str,
        ) -> AdapterFuture<'a, StructuredPromptDecomposition> {
            self.record(Operation::DecomposePrompt);
            Box::pin(async move {
                Ok::<_, GenerationError>(StructuredPromptDecomposition {
                    scene_description: "Rainy alley".into(),
                    visual_style: "Cyberpunk".into(),
                    protagonist_action: "Walking".into(),
                    camera_angle: "Low angle".into(),
                    camera_movement: "Tracking".into(),
                    lighting_details: "Neon".into(),
                    additional_keywords: vec!["rain".into()],
                })
            })
        }

        fn describe_subject_and_scene<'a>(
            &'a self,
            req: &'a SubjectSceneRequest,
        ) -> AdapterFuture<'a, String> {
            self.record(Operation::DescribeSubjectAndScene);
            Box::pin(async move {
                Ok::<_, GenerationError>(format!("{} in {} style", req.scene, req.style))
            })
        }

        fn describe_motion<'a>(&'a self, req: &'a MotionRequest) -> AdapterFuture<'a, String> {
            self.record(Operation::DescribeMotion);
            Box::pin(async move {
                Ok::<_, GenerationError>(format!("{} slowly", req.protagonist_action))
            })
        }

        fn compose_final<'a>(
            &'a self,
            req: &'a FinalComposeRequest,
        ) -> AdapterFuture<'a, Vec<VideoPromptVariation>> {
            self.record(Operation::ComposeFinal);
            Box::pin(async move {
                Ok::<_, GenerationError>(variations(&req.action_description))
            })
        }
    }

    fn robot_request() -> GenerationRequest {
        GenerationRequest {
            scene: "A robot walks through rain".into(),
            style: "Cyberpunk".into(),
            protagonist_action: "Walking".into(),
            camera_angle: "Low angle".into(),
            camera_movement: "Tracking".into(),
            camera_device: None,
            lighting: "Neon".into(),
            is_nsfw: false,
        }
    }

    #[tokio::test]
    async fn variations_reach_the_requested_adapter() {
        let qwen = StubAdapter::new(ProviderId::Qwen, CORE_CAPABILITIES);
        let router = Router::new().register(qwen.clone());

        let list = router
            .generate_variations(ProviderId::Qwen, &robot_request())
            .await
            .unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.iter().all(|v| !v.title.is_empty() && !v.prompt.is_empty()));
        assert_eq!(qwen.calls(), vec![Operation::GenerateVariations]);
    }

    #[tokio::test]
    async fn captions_are_returned_unchanged() {
        let ollama = StubAdapter::new(ProviderId::Ollama, FULL_CAPABILITIES);
        let router = Router::new().register(ollama.clone());

        // 1x1 transparent PNG
        let png: [u8; 67] = [
            0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
            0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78,
            0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00,
            0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
        ];
        let req = CaptionRequest::from_bytes(&png, "image/png");
        let caps = router.caption_image(ProviderId::Ollama, &req).await.unwrap();
        assert_eq!(caps, ollama.captions);
    }

    #[tokio::test]
    async fn unsupported_operation_falls_back_to_gemini_and_logs() {
        telemetry::capture::install();
        let gemini = StubAdapter::new(ProviderId::Gemini, FULL_CAPABILITIES);
        let lmstudio = StubAdapter::new(ProviderId::LmStudio, CORE_CAPABILITIES);
        let router = Router::new()
            .register(gemini.clone())
            .register(lmstudio.clone());

        let route = router.route(ProviderId::Anthropic, Operation::DecomposePrompt);
        assert_eq!(
            route,
            Route {
                requested: ProviderId::Anthropic,
                resolved: ProviderId::Gemini,
                fallback: true
            }
        );

        let d = router
            .decompose_prompt(ProviderId::Anthropic, "A robot walks through rain")
            .await
            .unwrap();
        assert_eq!(d.visual_style, "Cyberpunk");

        router
            .describe_motion(
                ProviderId::LmStudio,
                &MotionRequest {
                    refined_scene: "alley".into(),
                    protagonist_action: "Walking".into(),
                    is_nsfw: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            gemini.calls(),
            vec![Operation::DecomposePrompt, Operation::DescribeMotion]
        );
        assert!(lmstudio.calls().is_empty());

        let console = telemetry::capture::console_text();
        assert!(console.contains(
            "[WARN] router.fallback - decompose_prompt is not available on anthropic"
        ));
        assert!(console.contains("describe_motion is not available on lmstudio"));
    }

    #[tokio::test]
    async fn fallback_warning_is_printed_with_telemetry_off() {
        telemetry::capture::install();
        let gemini = StubAdapter::new(ProviderId::Gemini, FULL_CAPABILITIES);
        let router = Router::new().register(gemini.clone());

        let req = CaptionRequest::from_bytes(b"img", "image/png");
        router.caption_image(ProviderId::Perplexity, &req).await.unwrap();

        assert_eq!(gemini.calls(), vec![Operation::CaptionImage]);
        assert!(telemetry::capture::console_text().contains(
            "[WARN] router.fallback - caption_image is not available on perplexity, \
             falling back to gemini"
        ));
    }

    #[tokio::test]
    async fn staged_pipeline_chains_stage_outputs() {
        let gemini = StubAdapter::new(ProviderId::Gemini, FULL_CAPABILITIES);
        let qwen = StubAdapter::new(ProviderId::Qwen, CORE_CAPABILITIES);
        let router = Router::new().register(gemini.clone()).register(qwen.clone());

        let list = router
            .generate_staged(ProviderId::Qwen, &robot_request())
            .await
            .unwrap();
        assert_eq!(list.len(), 3);
        assert!(list[0]
            .title
            .starts_with("A robot walks through rain in Cyberpunk style, Walking slowly"));
        assert_eq!(gemini.calls(), Operation::STAGED.to_vec());
        assert!(qwen.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_dispatch() {
        let gemini = StubAdapter::new(ProviderId::Gemini, FULL_CAPABILITIES);
        let router = Router::new().register(gemini.clone());

        let err = router
            .generate_variations(ProviderId::Gemini, &GenerationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidRequest(_)));

        let err = router
            .caption_image(
                ProviderId::Gemini,
                &CaptionRequest {
                    image_data: String::new(),
                    mime_type: "image/png".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.operation, Operation::CaptionImage);
        assert!(gemini.calls().is_empty());
    }

    #[tokio::test]
    async fn no_adapter_at_all_is_unsupported() {
        let router = Router::new();
        assert!(!router.supports(ProviderId::Gemini, Operation::GenerateVariations));
        let err = router
            .generate_variations(ProviderId::Perplexity, &robot_request())
            .await
            .unwrap_err();
        assert_eq!(err.provider, ProviderId::Perplexity);
        assert!(matches!(err.kind, ErrorKind::Unsupported));
    }

    #[tokio::test]
    async fn missing_credential_is_reported_and_blocks_the_call() {
        let store = Arc::new(CredentialStore::in_memory());
        let router = Router::with_default_adapters(store.clone());
        assert!(!router.is_configured(ProviderId::Qwen));
        assert!(router.supports(ProviderId::Qwen, Operation::CaptionImage));
        assert!(!router.supports(ProviderId::Qwen, Operation::ComposeFinal));
        assert!(!router.supports(ProviderId::Stability, Operation::GenerateVariations));

        let req = CaptionRequest::from_bytes(b"img", "image/png");
        let err = router
            .caption_image(ProviderId::Qwen, &req)
            .await
            .unwrap_err();
        assert_eq!(err.provider, ProviderId::Qwen);
        assert!(matches!(err.kind, ErrorKind::Configuration { ref key } if key == "QWEN_API_KEY"));

        store.set("sk-qwen", ProviderId::Qwen);
        assert!(router.is_configured(ProviderId::Qwen));
    }

    #[test]
    fn route_without_gap_is_direct() {
        let router =
            Router::new().register(StubAdapter::new(ProviderId::Ollama, FULL_CAPABILITIES));
        for op in Operation::STAGED {
            let route = router.route(ProviderId::Ollama, op);
            assert!(!route.fallback);
            assert_eq!(route.resolved, ProviderId::Ollama);
        }
    }
}
