use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{thread, time::Duration};

/** \brief 数据库文件路径的环境变量覆盖。 */
pub const DB_PATH_ENV: &str = "PROMPTREEL_DB";
const DEFAULT_DB_PATH: &str = "promptreel.db";
/** \brief `app_config` 中遥测开关的键名。 */
pub const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief 打开默认数据库文件（`PROMPTREEL_DB` 或本地目录下的 promptreel.db）。
 */
pub fn open_default_db() -> Result<Connection> {
    let path = std::env::var(DB_PATH_ENV).unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建键值配置表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 读取配置项，不存在时返回 None。
 */
pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key=?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 写入（覆盖）配置项。
 */
pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

/**
 * \brief 删除配置项；键不存在时静默成功。
 */
pub fn delete_config(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key=?1", params![key]))?;
    Ok(())
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
