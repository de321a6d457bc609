use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use promptreel_core_sdk::credentials::{CredentialStore, SqliteKeyValueStore};
use promptreel_core_sdk::models::{
    CaptionRequest, GenerationRequest, Operation, ProviderId, ProviderSetting,
};
use promptreel_core_sdk::router::Router;
use promptreel_core_sdk::server::{self, AppState};
use promptreel_core_sdk::telemetry;

/**
 * \brief CLI 程序入口：配置 Provider 并调用生成操作。
 */
#[derive(Parser, Debug)]
#[command(name = "promptreel", version, about = "Cinematic video prompt generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 保存 Provider 凭据与附加配置。
     * \param credential API Key；本地 Provider（ollama/lmstudio）为服务地址
     */
    Init {
        #[arg(long, default_value = "gemini")]
        provider: String,
        #[arg(long)]
        credential: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /** \brief 保存后不切换为当前 Provider */
        #[arg(long, default_value_t = false)]
        no_activate: bool,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /** \brief 切换当前 Provider。 */
    Use { provider: String },

    /** \brief 清除某个 Provider 的凭据。 */
    Clear { provider: String },

    /** \brief 显示各 Provider 的配置状态。 */
    Status,

    /**
     * \brief 生成 3 条视频提示词变体。
     */
    Generate {
        #[arg(long)]
        scene: String,
        #[arg(long, default_value = "")]
        style: String,
        #[arg(long, default_value = "")]
        action: String,
        #[arg(long, default_value = "")]
        angle: String,
        #[arg(long, default_value = "")]
        movement: String,
        #[arg(long)]
        device: Option<String>,
        #[arg(long, default_value = "")]
        lighting: String,
        #[arg(long, default_value_t = false)]
        nsfw: bool,
        /** \brief 使用三段式流程 */
        #[arg(long, default_value_t = false)]
        staged: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
        /** \brief 临时覆盖当前 Provider */
        #[arg(long)]
        provider: Option<String>,
    },

    /** \brief 为图片生成 3 条描述。 */
    Caption {
        image: PathBuf,
        #[arg(long)]
        provider: Option<String>,
    },

    /** \brief 将提示词拆解为结构化字段。 */
    Decompose {
        prompt: String,
        #[arg(long)]
        provider: Option<String>,
    },

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5173")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = Arc::new(CredentialStore::new(
        SqliteKeyValueStore::open_default().context("open database failed")?,
    ));
    telemetry::set_enabled(store.telemetry_enabled());

    match cli.command {
        Commands::Init {
            provider,
            credential,
            base_url,
            model,
            no_activate,
            enable_telemetry,
        } => {
            let id: ProviderId = provider.parse()?;
            if let Some(credential) = credential {
                store.set(&credential, id);
            }
            if let Some(base_url) = base_url {
                store.set_setting(id, ProviderSetting::BaseUrl, &base_url);
            }
            if let Some(model) = model {
                store.set_setting(id, ProviderSetting::Model, &model);
            }
            if !no_activate {
                store.set_active(id);
            }
            store.set_telemetry_enabled(enable_telemetry);
            telemetry::set_enabled(enable_telemetry);
            println!(
                "Saved {} (configured={} active={})",
                id.label(),
                store.is_configured(id),
                store.get_active() == id
            );
        }
        Commands::Use { provider } => {
            let id: ProviderId = provider.parse()?;
            store.set_active(id);
            if !store.is_configured(id) {
                eprintln!(
                    "warning: {} has no {} yet, run: promptreel init --provider {} --credential ...",
                    id,
                    id.credential_key(),
                    id
                );
            }
            println!("Active provider: {}", id.label());
        }
        Commands::Clear { provider } => {
            let id: ProviderId = provider.parse()?;
            store.clear(id);
            println!("Cleared {}", id.credential_key());
        }
        Commands::Status => {
            let router = Router::with_default_adapters(store.clone());
            let active = store.get_active();
            for id in ProviderId::ALL {
                let ops: Vec<&str> = Operation::CORE
                    .into_iter()
                    .chain(Operation::STAGED)
                    .filter(|op| router.supports(id, *op))
                    .map(|op| op.as_str())
                    .collect();
                println!(
                    "{} {:<10} configured={:<5} ops=[{}]",
                    if id == active { "*" } else { " " },
                    id.as_str(),
                    store.is_configured(id),
                    ops.join(",")
                );
            }
        }
        Commands::Generate {
            scene,
            style,
            action,
            angle,
            movement,
            device,
            lighting,
            nsfw,
            staged,
            json,
            provider,
        } => {
            let id = resolve_provider(&store, provider)?;
            let router = Router::with_default_adapters(store.clone());
            let req = GenerationRequest {
                scene,
                style,
                protagonist_action: action,
                camera_angle: angle,
                camera_movement: movement,
                camera_device: device,
                lighting,
                is_nsfw: nsfw,
            };
            telemetry::log_event(
                "cli.generate",
                &format!("provider={} staged={} scene_len={}", id, staged, req.scene.len()),
            );
            let prompts = if staged {
                router.generate_staged(id, &req).await?
            } else {
                router.generate_variations(id, &req).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&prompts)?);
            } else {
                for (idx, v) in prompts.iter().enumerate() {
                    println!("[{}] {}\n{}\n", idx + 1, v.title, v.prompt);
                }
            }
        }
        Commands::Caption { image, provider } => {
            let id = resolve_provider(&store, provider)?;
            let mime_type = mime_from_extension(&image)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("read image {} failed", image.display()))?;
            let req = CaptionRequest::from_bytes(&bytes, mime_type);
            let router = Router::with_default_adapters(store.clone());
            for (idx, caption) in router.caption_image(id, &req).await?.iter().enumerate() {
                println!("[{}] {}\n", idx + 1, caption);
            }
        }
        Commands::Decompose { prompt, provider } => {
            let id = resolve_provider(&store, provider)?;
            let router = Router::with_default_adapters(store.clone());
            let decomposition = router.decompose_prompt(id, &prompt).await?;
            println!("{}", serde_json::to_string_pretty(&decomposition)?);
        }
        Commands::Serve { addr } => {
            server::run(&addr, AppState::new(store)).await?;
        }
    }

    Ok(())
}

fn resolve_provider(store: &CredentialStore, provider: Option<String>) -> Result<ProviderId> {
    match provider {
        Some(p) => p.parse(),
        None => Ok(store.get_active()),
    }
}

fn mime_from_extension(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        other => bail!("unsupported image type: {:?}", other),
    })
}
