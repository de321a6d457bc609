use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{Mutex, RwLock},
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/** \brief 日志目录的环境变量覆盖。 */
pub const LOG_DIR_ENV: &str = "PROMPTREEL_LOG_DIR";
const LOG_FILE: &str = "promptreel.log";

static TELEMETRY_ENABLED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

static LOG_DIR: Lazy<RwLock<PathBuf>> = Lazy::new(|| {
    RwLock::new(PathBuf::from(
        std::env::var(LOG_DIR_ENV).unwrap_or_else(|_| "logs".to_string()),
    ))
});

/**
 * \brief 更新遥测开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前遥测开关状态。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 修改日志目录。
 */
pub fn set_log_dir(dir: impl Into<PathBuf>) {
    if let Ok(mut guard) = LOG_DIR.write() {
        *guard = dir.into();
    }
}

/** \brief 控制台输出，默认 stderr；不受遥测开关影响。 */
static CONSOLE: Lazy<Mutex<Box<dyn Write + Send>>> =
    Lazy::new(|| Mutex::new(Box::new(std::io::stderr())));

/**
 * \brief 替换控制台输出目标（测试中用于捕获告警）。
 */
pub fn set_console(writer: impl Write + Send + 'static) {
    if let Ok(mut guard) = CONSOLE.lock() {
        *guard = Box::new(writer);
    }
}

/** \brief 当前日志文件的完整路径。 */
pub fn log_file() -> PathBuf {
    LOG_DIR
        .read()
        .map(|g| g.join(LOG_FILE))
        .unwrap_or_else(|_| PathBuf::from("logs").join(LOG_FILE))
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    log("INFO", category, message);
}

/**
 * \brief 必须让用户看到的告警：总是写到控制台，遥测开启时同时写入日志文件。
 */
pub fn warn_always(category: &str, message: &str) {
    if let Ok(mut console) = CONSOLE.lock() {
        let _ = writeln!(console, "[WARN] {} - {}", category, message);
    }
    log("WARN", category, message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    log("ERROR", category, message);
}

fn log(level: &str, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let path = log_file();
    if let Some(log_dir) = path.parent() {
        if !log_dir.exists() {
            std::fs::create_dir_all(log_dir)?;
        }
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{} [{}] {} - {}", timestamp, level, category, message)?;
    Ok(())
}
