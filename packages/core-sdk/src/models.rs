use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/**
 * \brief 可选的生成后端标识。
 * \details 顺序即展示顺序，第一个（Gemini）为默认/参考 Provider。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Stability,
    Perplexity,
    Qwen,
    Ollama,
    #[serde(rename = "lmstudio")]
    LmStudio,
}

/**
 * \brief 凭据条目的语义：密钥或本地服务地址。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ApiKey,
    BaseUrl,
}

/**
 * \brief Provider 的附加配置项。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSetting {
    BaseUrl,
    Model,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::Gemini,
        ProviderId::OpenAi,
        ProviderId::Anthropic,
        ProviderId::Stability,
        ProviderId::Perplexity,
        ProviderId::Qwen,
        ProviderId::Ollama,
        ProviderId::LmStudio,
    ];

    /** \brief 默认 Provider，同时也是能力缺口时的回退目标。 */
    pub const DEFAULT: ProviderId = ProviderId::Gemini;

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Stability => "stability",
            ProviderId::Perplexity => "perplexity",
            ProviderId::Qwen => "qwen",
            ProviderId::Ollama => "ollama",
            ProviderId::LmStudio => "lmstudio",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "Google Gemini",
            ProviderId::OpenAi => "OpenAI",
            ProviderId::Anthropic => "Anthropic",
            ProviderId::Stability => "Stability AI",
            ProviderId::Perplexity => "Perplexity",
            ProviderId::Qwen => "Qwen (DashScope)",
            ProviderId::Ollama => "Ollama (Local)",
            ProviderId::LmStudio => "LM Studio (Local)",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "GEMINI",
            ProviderId::OpenAi => "OPENAI",
            ProviderId::Anthropic => "ANTHROPIC",
            ProviderId::Stability => "STABILITY",
            ProviderId::Perplexity => "PERPLEXITY",
            ProviderId::Qwen => "QWEN",
            ProviderId::Ollama => "OLLAMA",
            ProviderId::LmStudio => "LM_STUDIO",
        }
    }

    /**
     * \brief 本地推理服务以地址作为凭据，云服务以密钥作为凭据。
     */
    pub fn credential_kind(&self) -> CredentialKind {
        match self {
            ProviderId::Ollama | ProviderId::LmStudio => CredentialKind::BaseUrl,
            _ => CredentialKind::ApiKey,
        }
    }

    /** \brief 凭据在键值存储中的固定键名，例如 `GEMINI_API_KEY`。 */
    pub fn credential_key(&self) -> String {
        match self.credential_kind() {
            CredentialKind::ApiKey => format!("{}_API_KEY", self.key_prefix()),
            CredentialKind::BaseUrl => format!("{}_BASE_URL", self.key_prefix()),
        }
    }

    /** \brief 附加配置项的键名，例如 `OLLAMA_MODEL`。 */
    pub fn setting_key(&self, setting: ProviderSetting) -> String {
        match setting {
            ProviderSetting::BaseUrl => format!("{}_BASE_URL", self.key_prefix()),
            ProviderSetting::Model => format!("{}_MODEL", self.key_prefix()),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("unknown provider: {}", s))
    }
}

/**
 * \brief 路由层暴露的逻辑操作，用于能力检查、错误信息与日志。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GenerateVariations,
    CaptionImage,
    DecomposePrompt,
    DescribeSubjectAndScene,
    DescribeMotion,
    ComposeFinal,
}

impl Operation {
    pub const CORE: [Operation; 3] = [
        Operation::GenerateVariations,
        Operation::CaptionImage,
        Operation::DecomposePrompt,
    ];

    pub const STAGED: [Operation; 3] = [
        Operation::DescribeSubjectAndScene,
        Operation::DescribeMotion,
        Operation::ComposeFinal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GenerateVariations => "generate_variations",
            Operation::CaptionImage => "caption_image",
            Operation::DecomposePrompt => "decompose_prompt",
            Operation::DescribeSubjectAndScene => "describe_subject_and_scene",
            Operation::DescribeMotion => "describe_motion",
            Operation::ComposeFinal => "compose_final",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief 生成请求：描述字段均为调用方拼接好的字符串。
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /** \brief 主场景描述，必填 */
    pub scene: String,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub protagonist_action: String,
    #[serde(default)]
    pub camera_angle: String,
    #[serde(default)]
    pub camera_movement: String,
    #[serde(default)]
    pub camera_device: Option<String>,
    #[serde(default)]
    pub lighting: String,
    /** \brief 成人内容模式：只影响语气与系统指令 */
    #[serde(default)]
    pub is_nsfw: bool,
}

/**
 * \brief 图片描述请求：不带 data URL 前缀的 base64 数据及其 MIME 类型。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRequest {
    pub image_data: String,
    pub mime_type: String,
}

impl CaptionRequest {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self {
            image_data: STANDARD.encode(bytes),
            mime_type: mime_type.to_string(),
        }
    }

    /** \brief 拼接为 `data:<mime>;base64,<data>`，供多段消息格式使用。 */
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.image_data)
    }
}

/**
 * \brief 单个视频提示词变体。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPromptVariation {
    pub title: String,
    pub prompt: String,
}

/**
 * \brief 提示词的结构化拆解结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPromptDecomposition {
    pub scene_description: String,
    pub visual_style: String,
    pub protagonist_action: String,
    pub camera_angle: String,
    pub camera_movement: String,
    pub lighting_details: String,
    #[serde(default)]
    pub additional_keywords: Vec<String>,
}

/** \brief 三段式流程第一段：主体与场景。 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSceneRequest {
    pub scene: String,
    pub style: String,
    pub is_nsfw: bool,
}

/** \brief 三段式流程第二段：动作。 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionRequest {
    pub refined_scene: String,
    pub protagonist_action: String,
    pub is_nsfw: bool,
}

/** \brief 三段式流程第三段：镜头与最终成稿。 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalComposeRequest {
    pub action_description: String,
    pub camera_angle: String,
    pub camera_movement: String,
    pub lighting: String,
    pub camera_device: Option<String>,
    pub is_nsfw: bool,
}

/**
 * \brief 交给外部缓存层的一批生成结果。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBatch {
    pub id: String,
    pub prompts: Vec<VideoPromptVariation>,
}

/**
 * \brief Chat 消息结构，与 OpenAI Chat 消息格式对齐；content 可为纯文本或多段内容。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: serde_json::Value,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: serde_json::Value::String(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: serde_json::Value::String(text.into()),
        }
    }

    /** \brief 文本加图片（data URL）的多段用户消息。 */
    pub fn user_with_image(text: impl Into<String>, data_url: String) -> Self {
        Self {
            role: "user".to_string(),
            content: serde_json::json!([
                { "type": "text", "text": text.into() },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_parse_from_their_names() {
        for p in ProviderId::ALL {
            assert_eq!(p.as_str().parse::<ProviderId>().unwrap(), p);
        }
        assert_eq!(" LMStudio ".parse::<ProviderId>().unwrap(), ProviderId::LmStudio);
        assert!("mistral".parse::<ProviderId>().is_err());
    }

    #[test]
    fn credential_keys_follow_provider_layout() {
        assert_eq!(ProviderId::Gemini.credential_key(), "GEMINI_API_KEY");
        assert_eq!(ProviderId::Qwen.credential_key(), "QWEN_API_KEY");
        assert_eq!(ProviderId::Ollama.credential_key(), "OLLAMA_BASE_URL");
        assert_eq!(ProviderId::LmStudio.credential_key(), "LM_STUDIO_BASE_URL");
        assert_eq!(
            ProviderId::LmStudio.setting_key(ProviderSetting::Model),
            "LM_STUDIO_MODEL"
        );
    }

    #[test]
    fn provider_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ProviderId::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let back: ProviderId = serde_json::from_str("\"lmstudio\"").unwrap();
        assert_eq!(back, ProviderId::LmStudio);
    }

    #[test]
    fn caption_request_builds_data_url() {
        let req = CaptionRequest::from_bytes(b"abc", "image/png");
        assert_eq!(req.image_data, "YWJj");
        assert_eq!(req.data_url(), "data:image/png;base64,YWJj");
    }
}
