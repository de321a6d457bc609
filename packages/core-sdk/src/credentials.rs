use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::db;
use crate::models::{ProviderId, ProviderSetting};
use crate::telemetry;

/** \brief 当前激活 Provider 的键名。 */
pub const ACTIVE_PROVIDER_KEY: &str = "ACTIVE_PROVIDER";

/**
 * \brief 凭据存储的底层键值后端。
 */
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/**
 * \brief 基于 SQLite `app_config` 表的持久化后端。
 */
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    pub fn new(conn: Connection) -> Result<Self> {
        db::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::new(db::open_default_db()?)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("credential store connection poisoned"))?;
        f(&guard)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| db::get_config(conn, key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| db::set_config(conn, key, value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| db::delete_config(conn, key))
    }
}

/**
 * \brief 进程内后端，用于测试或无法持久化的运行环境。
 */
#[derive(Default)]
pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.inner.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

/**
 * \brief Provider 凭据与激活状态的存储。
 * \details 所有操作同步且不会失败：底层读写出错时记录日志并退化为 None / 空操作。
 */
pub struct CredentialStore {
    backend: Box<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryKeyValueStore::default())
    }

    /**
     * \brief 打开默认 SQLite 存储；打不开时退化为进程内存储。
     */
    pub fn open_default() -> Self {
        match SqliteKeyValueStore::open_default() {
            Ok(store) => Self::new(store),
            Err(err) => {
                telemetry::log_error(
                    "credentials",
                    &format!("persistent store unavailable, using memory: {}", err),
                );
                Self::in_memory()
            }
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value,
            Err(err) => {
                telemetry::log_error("credentials", &format!("read {} failed: {}", key, err));
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.backend.set(key, value) {
            telemetry::log_error("credentials", &format!("write {} failed: {}", key, err));
        }
    }

    fn remove(&self, key: &str) {
        if let Err(err) = self.backend.remove(key) {
            telemetry::log_error("credentials", &format!("remove {} failed: {}", key, err));
        }
    }

    /**
     * \brief 当前激活的 Provider；未设置或无法识别时返回默认 Provider。
     */
    pub fn get_active(&self) -> ProviderId {
        self.read(ACTIVE_PROVIDER_KEY)
            .and_then(|v| v.parse::<ProviderId>().ok())
            .unwrap_or(ProviderId::DEFAULT)
    }

    pub fn set_active(&self, id: ProviderId) {
        self.write(ACTIVE_PROVIDER_KEY, id.as_str());
    }

    /**
     * \brief 以字符串切换 Provider，无法识别时为空操作，返回是否生效。
     */
    pub fn set_active_str(&self, id: &str) -> bool {
        match id.parse::<ProviderId>() {
            Ok(provider) => {
                self.set_active(provider);
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, id: ProviderId) -> Option<String> {
        self.read(&id.credential_key())
    }

    /** \brief 保存凭据（去除首尾空白后覆盖）。 */
    pub fn set(&self, secret: &str, id: ProviderId) {
        self.write(&id.credential_key(), secret.trim());
    }

    pub fn clear(&self, id: ProviderId) {
        self.remove(&id.credential_key());
    }

    pub fn is_configured(&self, id: ProviderId) -> bool {
        self.get(id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /**
     * \brief 读取附加配置；空字符串视为未设置。
     */
    pub fn get_setting(&self, id: ProviderId, setting: ProviderSetting) -> Option<String> {
        self.read(&id.setting_key(setting))
            .filter(|v| !v.trim().is_empty())
    }

    pub fn set_setting(&self, id: ProviderId, setting: ProviderSetting, value: &str) {
        self.write(&id.setting_key(setting), value.trim());
    }

    pub fn clear_setting(&self, id: ProviderId, setting: ProviderSetting) {
        self.remove(&id.setting_key(setting));
    }

    /**
     * \brief 遥测开关，与凭据共用同一后端；未设置时关闭。
     */
    pub fn telemetry_enabled(&self) -> bool {
        self.read(db::TELEMETRY_KEY).map(|v| v == "1").unwrap_or(false)
    }

    pub fn set_telemetry_enabled(&self, enabled: bool) {
        self.write(db::TELEMETRY_KEY, if enabled { "1" } else { "0" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(anyhow!("storage disabled"))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(anyhow!("storage disabled"))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(anyhow!("storage disabled"))
        }
    }

    fn sqlite_store() -> CredentialStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        CredentialStore::new(SqliteKeyValueStore::new(conn).expect("migrate"))
    }

    #[test]
    fn active_provider_round_trips() {
        let store = sqlite_store();
        for p in ProviderId::ALL {
            store.set_active(p);
            assert_eq!(store.get_active(), p);
        }
    }

    #[test]
    fn active_provider_defaults_to_gemini() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.get_active(), ProviderId::Gemini);

        store.set_active(ProviderId::Qwen);
        assert!(!store.set_active_str("mistral"));
        assert_eq!(store.get_active(), ProviderId::Qwen);

        store.write(ACTIVE_PROVIDER_KEY, "not-a-provider");
        assert_eq!(store.get_active(), ProviderId::Gemini);
    }

    #[test]
    fn secrets_are_trimmed_and_cleared() {
        let store = sqlite_store();
        for secret in ["  sk-abc \n", "", "   ", "plain"] {
            store.set(secret, ProviderId::OpenAi);
            assert_eq!(
                store.get(ProviderId::OpenAi).as_deref(),
                Some(secret.trim())
            );
        }
        store.clear(ProviderId::OpenAi);
        assert_eq!(store.get(ProviderId::OpenAi), None);
    }

    #[test]
    fn is_configured_requires_non_empty_secret() {
        let store = CredentialStore::in_memory();
        assert!(!store.is_configured(ProviderId::Qwen));
        store.set("   ", ProviderId::Qwen);
        assert!(!store.is_configured(ProviderId::Qwen));
        store.set("sk-qwen", ProviderId::Qwen);
        assert!(store.is_configured(ProviderId::Qwen));
        assert!(!store.is_configured(ProviderId::Gemini));
    }

    #[test]
    fn telemetry_flag_shares_the_backend() {
        let store = sqlite_store();
        assert!(!store.telemetry_enabled());
        store.set_telemetry_enabled(true);
        assert!(store.telemetry_enabled());
        store.set_telemetry_enabled(false);
        assert!(!store.telemetry_enabled());
        assert!(!store.is_configured(ProviderId::Gemini));
    }

    #[test]
    fn settings_are_separate_from_credentials() {
        let store = CredentialStore::in_memory();
        store.set_setting(ProviderId::Ollama, ProviderSetting::Model, " llava:13b ");
        assert_eq!(
            store
                .get_setting(ProviderId::Ollama, ProviderSetting::Model)
                .as_deref(),
            Some("llava:13b")
        );
        assert!(!store.is_configured(ProviderId::Ollama));
        store.clear_setting(ProviderId::Ollama, ProviderSetting::Model);
        assert_eq!(
            store.get_setting(ProviderId::Ollama, ProviderSetting::Model),
            None
        );
    }

    #[test]
    fn storage_failures_degrade_silently() {
        let store = CredentialStore::new(BrokenStore);
        store.set("sk", ProviderId::Gemini);
        store.set_active(ProviderId::Ollama);
        store.clear(ProviderId::Gemini);
        assert_eq!(store.get(ProviderId::Gemini), None);
        assert_eq!(store.get_active(), ProviderId::Gemini);
        assert!(!store.is_configured(ProviderId::Gemini));
    }
}
