use crate::models::{Operation, ProviderId};
use crate::normalizer::ParseError;

/** \brief 错误信息中保留的响应体最大字符数。 */
pub const BODY_EXCERPT_LEN: usize = 500;

/**
 * \brief 所有适配器与路由操作统一返回的错误：标明后端、操作与具体原因。
 */
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed on {provider}: {kind}")]
pub struct GenerationError {
    pub provider: ProviderId,
    pub operation: Operation,
    #[source]
    pub kind: ErrorKind,
}

impl GenerationError {
    pub fn new(provider: ProviderId, operation: Operation, kind: ErrorKind) -> Self {
        Self {
            provider,
            operation,
            kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("not configured: missing {key}")]
    Configuration { key: String },

    #[error("transport error ({}): {body}", status_label(.status))]
    Transport { status: Option<u16>, body: String },

    #[error("empty response")]
    EmptyResponse,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("operation not implemented by this provider")]
    Unsupported,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ErrorKind {
    fn from(err: reqwest::Error) -> Self {
        // URL 中可能带有查询参数形式的密钥
        let err = err.without_url();
        ErrorKind::Transport {
            status: err.status().map(|s| s.as_u16()),
            body: excerpt(&err.to_string(), BODY_EXCERPT_LEN),
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

/**
 * \brief 按字符截断文本，超出部分以 `...` 结尾。
 */
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
