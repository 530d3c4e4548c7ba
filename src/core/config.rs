// 配置读取：YAML 文件 + ${VAR:-default} 占位展开 + 环境变量覆盖。
use crate::wecom::credential_store::Credentials;
use crate::wecom::transport::DEFAULT_API_BASE_URL;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::env;
use std::fs;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub wecom: WecomConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WecomConfig {
    pub corp_id: Option<String>,
    pub token: Option<String>,
    pub encoding_aes_key: Option<String>,
    pub agent_id: Option<String>,
    pub agent_secret: Option<String>,
    pub api_base_url: String,
    pub http_timeout_s: f64,
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            corp_id: None,
            token: None,
            encoding_aes_key: None,
            agent_id: None,
            agent_secret: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            http_timeout_s: 10.0,
        }
    }
}

impl WecomConfig {
    /// 发送方三元组齐全时返回凭据与应用 ID。
    pub fn sender_credentials(&self) -> Option<(Credentials, String)> {
        let corp_id = non_empty(&self.corp_id)?;
        let agent_id = non_empty(&self.agent_id)?;
        let secret = non_empty(&self.agent_secret)?;
        Some((Credentials::new(corp_id, secret), agent_id.to_string()))
    }

    pub fn token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    pub fn corp_id(&self) -> Option<&str> {
        non_empty(&self.corp_id)
    }

    pub fn encoding_aes_key(&self) -> Option<&str> {
        non_empty(&self.encoding_aes_key)
    }

    /// 必须为正且能表示为 `Duration`，`inf`、`NaN` 与超大值都会被拒绝。
    pub fn http_timeout(&self) -> Result<Duration, ConfigError> {
        let seconds = self.http_timeout_s;
        if seconds.is_nan() || seconds <= 0.0 {
            return Err(ConfigError::InvalidTimeout(seconds.to_string()));
        }
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ConfigError::InvalidTimeout(seconds.to_string()))
    }
}

/// 重试上限与错误码集合均可配置，默认值对齐企业微信文档。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub token_invalid_codes: Vec<i64>,
    pub auth_invalid_codes: Vec<i64>,
    pub default_token_ttl_s: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            token_invalid_codes: vec![42001, 40014],
            auth_invalid_codes: vec![40013, 40001],
            default_token_ttl_s: 7200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 为空时 token 只缓存在内存中。
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/bridge.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub longtask_delay_s: u64,
    pub demo_asset_dir: String,
    /// IANA 时区名，例如 Asia/Shanghai；为空时使用本机时区。
    pub timezone: Option<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            longtask_delay_s: 5,
            demo_asset_dir: "tmp".to_string(),
            timezone: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_backup_days: i64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_backup_days: 30,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("缺少必填配置: {0}")]
    Missing(&'static str),
    #[error("发送方配置不完整，缺少: {}", .0.join(", "))]
    PartialSender(Vec<&'static str>),
    #[error("delivery.max_attempts 必须 >= 1，当前为 {0}")]
    InvalidAttempts(u32),
    #[error("wecom.encoding_aes_key 无效: {0}")]
    InvalidAesKey(String),
    #[error("wecom.http_timeout_s 必须为有限正数，当前为 {0}")]
    InvalidTimeout(String),
    #[error("环境变量 {name} 取值无效: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("读取配置文件失败: {path}: {message}")]
    Read { path: String, message: String },
    #[error("配置文件解析失败: {path}: {message}")]
    Parse { path: String, message: String },
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wecom.token().is_none() {
            return Err(ConfigError::Missing("wecom.token"));
        }
        if self.wecom.corp_id().is_none() {
            return Err(ConfigError::Missing("wecom.corp_id"));
        }
        let agent_id = non_empty(&self.wecom.agent_id);
        let agent_secret = non_empty(&self.wecom.agent_secret);
        // 两项都空表示只收不发。
        match (agent_id, agent_secret) {
            (Some(_), None) => return Err(ConfigError::PartialSender(vec!["wecom.agent_secret"])),
            (None, Some(_)) => return Err(ConfigError::PartialSender(vec!["wecom.agent_id"])),
            _ => {}
        }
        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts(self.delivery.max_attempts));
        }
        self.wecom.http_timeout()?;
        if let Some(key) = self.wecom.encoding_aes_key() {
            crate::wecom::callback::decode_encoding_aes_key(key)
                .map_err(|err| ConfigError::InvalidAesKey(err.to_string()))?;
        }
        Ok(())
    }

    pub fn sender_configured(&self) -> bool {
        self.wecom.sender_credentials().is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// 端口既可以写数字，也可以是占位展开后的字符串。
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(i64),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match PortValue::deserialize(deserializer)? {
        PortValue::Number(number) => number.to_string(),
        PortValue::Text(text) => text,
    };
    raw.trim()
        .parse::<u16>()
        .map_err(|_| de::Error::custom(format!("invalid port: {raw:?}")))
}

/// 读取 `$BRIDGE_CONFIG_PATH`（默认 `config/bridge.yaml`）并叠加环境变量覆盖。
pub fn load_config() -> Result<Config, ConfigError> {
    let path = env::var("BRIDGE_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let lookup = |name: &str| env::var(name).ok();
    let mut config = load_config_from(&path, lookup)?;
    apply_env_overrides(&mut config, lookup)?;
    Ok(config)
}

/// 文件不存在时使用默认配置（全部走环境变量也能启动）；存在却读不了或字段非法则报错。
pub fn load_config_from<F>(path: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.to_string(),
                message: err.to_string(),
            })
        }
    };
    parse_config(&text, &lookup).map_err(|message| ConfigError::Parse {
        path: path.to_string(),
        message,
    })
}

fn parse_config<F>(text: &str, lookup: &F) -> Result<Config, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut document: Value = serde_yaml::from_str(text).map_err(|err| err.to_string())?;
    if document.is_null() {
        return Ok(Config::default());
    }
    substitute_placeholders(&mut document, lookup);
    serde_yaml::from_value(document).map_err(|err| err.to_string())
}

/// 非空的环境变量覆盖文件中的同名配置；取值无法解析时报错而不是静默忽略。
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let wecom = &mut config.wecom;
    for (name, slot) in [
        ("WECOM_CORP_ID", &mut wecom.corp_id),
        ("WECOM_TOKEN", &mut wecom.token),
        ("WECOM_ENCODING_AES_KEY", &mut wecom.encoding_aes_key),
        ("WECOM_AGENT_ID", &mut wecom.agent_id),
        ("WECOM_AGENT_SECRET", &mut wecom.agent_secret),
    ] {
        if let Some(value) = read(name) {
            *slot = Some(value);
        }
    }
    if let Some(value) = read("WECOM_API_BASE_URL") {
        wecom.api_base_url = value;
    }
    if let Some(value) = read("WECOM_HTTP_TIMEOUT") {
        wecom.http_timeout_s = parse_env("WECOM_HTTP_TIMEOUT", value)?;
    }
    if let Some(value) = read("BRIDGE_HOST") {
        config.server.host = value;
    }
    if let Some(value) = read("BRIDGE_PORT") {
        config.server.port = parse_env("BRIDGE_PORT", value)?;
    }
    if let Some(value) = read("BRIDGE_DB_PATH") {
        config.storage.db_path = value;
    }
    if let Some(value) = read("LOG_DIR") {
        config.observability.log_dir = value;
    }
    if let Some(value) = read("LOG_LEVEL") {
        config.observability.log_level = value;
    }
    if let Some(value) = read("LOG_BACKUP_DAYS") {
        config.observability.log_backup_days = parse_env("LOG_BACKUP_DAYS", value)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

fn substitute_placeholders<F>(value: &mut Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) if text.contains("${") => {
            *text = expand_placeholders(text, lookup);
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                substitute_placeholders(item, lookup);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute_placeholders(item, lookup);
            }
        }
        _ => {}
    }
}

/// `${NAME}` 取变量值，`${NAME:-fallback}` 在变量缺失或为空时取 fallback；未闭合的占位原样保留。
fn expand_placeholders<F>(text: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(text.len());
    let mut remaining = text;
    loop {
        let Some(open) = remaining.find("${") else {
            expanded.push_str(remaining);
            break;
        };
        let (before, placeholder) = remaining.split_at(open);
        expanded.push_str(before);
        let body = &placeholder[2..];
        let Some(close) = body.find('}') else {
            expanded.push_str(placeholder);
            break;
        };
        let (name, fallback) = match body[..close].split_once(":-") {
            Some((name, fallback)) => (name.trim(), Some(fallback)),
            None => (body[..close].trim(), None),
        };
        if name.is_empty() {
            expanded.push_str(&placeholder[..close + 3]);
        } else if let Some(value) = lookup(name).filter(|value| !value.is_empty()) {
            expanded.push_str(&value);
        } else {
            expanded.push_str(fallback.unwrap_or_default());
        }
        remaining = &body[close + 1..];
    }
    expanded
}
