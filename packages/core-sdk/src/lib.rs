pub mod credentials;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod normalizer;
pub mod prompts;
pub mod providers;
pub mod router;
pub mod server;
pub mod shape;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::credentials::CredentialStore;
    pub use crate::error::{ErrorKind, GenerationError};
    pub use crate::models::{
        CaptionRequest, GenerationRequest, Operation, PromptBatch, ProviderId,
        StructuredPromptDecomposition, VideoPromptVariation,
    };
    pub use crate::router::{Route, Router};
    pub use crate::{db, server, telemetry};
}
