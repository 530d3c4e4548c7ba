// access_token 生命周期：内存缓存优先，其次持久化表，过期或被拒时按凭据键串行刷新。
use crate::wecom::credential_store::{CredentialStore, Credentials, TokenRecord};
use crate::wecom::error::{WecomError, WecomResult};
use crate::wecom::transport::{vendor_code, VendorHttp};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

const GET_TOKEN_PATH: &str = "/cgi-bin/gettoken";

pub struct TokenManager {
    http: VendorHttp,
    store: Arc<dyn CredentialStore>,
    default_ttl_s: i64,
    memory: Mutex<HashMap<String, TokenRecord>>,
    key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TokenManager {
    pub fn new(http: VendorHttp, store: Arc<dyn CredentialStore>, default_ttl_s: u64) -> Self {
        Self {
            http,
            store,
            default_ttl_s: i64::try_from(default_ttl_s.max(1)).unwrap_or(7200),
            memory: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(&self, credentials: &Credentials) -> WecomResult<String> {
        let key = credentials.credential_key();
        if let Some(token) = self.cached(&key).await {
            return Ok(token);
        }
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;
        // 等锁期间可能已被其它调用刷新。
        if let Some(token) = self.cached(&key).await {
            return Ok(token);
        }
        self.fetch_and_store(credentials, &key).await
    }

    /// 强制下一次 `get_token` 重新向企业微信申请，不看缓存里的过期时间。
    pub async fn invalidate(&self, credentials: &Credentials) {
        let key = credentials.credential_key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;
        self.mark_stale(&key).await;
    }

    /// 被拒的 token 若已被并发调用换掉，直接复用新的，避免重复刷新。
    pub async fn refresh(&self, credentials: &Credentials, rejected: &str) -> WecomResult<String> {
        let key = credentials.credential_key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;
        if let Some(token) = self.cached(&key).await {
            if token != rejected {
                return Ok(token);
            }
        }
        self.mark_stale(&key).await;
        self.fetch_and_store(credentials, &key).await
    }

    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn cached(&self, key: &str) -> Option<String> {
        let now = Utc::now().timestamp();
        let memory_hit = self.memory.lock().get(key).cloned();
        if let Some(record) = memory_hit {
            // 内存中有记录（包括失效标记）时不再回读持久化表。
            return record.is_valid_at(now).then_some(record.token);
        }
        let store = self.store.clone();
        let lookup_key = key.to_string();
        let loaded = tokio::task::spawn_blocking(move || store.load(&lookup_key)).await;
        let record = match loaded {
            Ok(Ok(record)) => record?,
            Ok(Err(err)) => {
                warn!("读取 token 缓存失败，重新获取: {err}");
                return None;
            }
            Err(err) => {
                warn!("读取 token 缓存任务异常: {err}");
                return None;
            }
        };
        if !record.is_valid_at(now) {
            info!("token 已过期，重新获取");
            return None;
        }
        let token = record.token.clone();
        self.memory.lock().insert(key.to_string(), record);
        Some(token)
    }

    async fn mark_stale(&self, key: &str) {
        let tombstone = {
            let mut memory = self.memory.lock();
            let token = memory
                .get(key)
                .map(|record| record.token.clone())
                .unwrap_or_default();
            let record = TokenRecord {
                credential_key: key.to_string(),
                token,
                expires_at: 0,
            };
            memory.insert(key.to_string(), record.clone());
            record
        };
        self.persist(tombstone).await;
    }

    async fn fetch_and_store(&self, credentials: &Credentials, key: &str) -> WecomResult<String> {
        let body = self
            .http
            .get(
                GET_TOKEN_PATH,
                &[
                    ("corpid", credentials.corp_id.as_str()),
                    ("corpsecret", credentials.secret.as_str()),
                ],
            )
            .await?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                WecomError::TokenUnavailable(format!(
                    "errcode={}, body={body}",
                    vendor_code(&body)
                ))
            })?;
        let expires_in = body
            .get("expires_in")
            .and_then(Value::as_i64)
            .filter(|value| *value > 0)
            .unwrap_or(self.default_ttl_s);
        let record = TokenRecord {
            credential_key: key.to_string(),
            token: token.clone(),
            expires_at: Utc::now().timestamp() + expires_in,
        };
        self.memory.lock().insert(key.to_string(), record.clone());
        self.persist(record).await;
        info!(expires_in, "access token refreshed");
        Ok(token)
    }

    // 持久化失败只告警：内存中的新 token 仍然可用，下次过期检查会再次刷新。
    async fn persist(&self, record: TokenRecord) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.save(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("token 持久化失败（不影响请求）: {err}"),
            Err(err) => warn!("token 持久化任务异常（不影响请求）: {err}"),
        }
    }
}
