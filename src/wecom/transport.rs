// 企业微信 HTTP 执行层：GET 直接返回业务结果，POST 在 token 失效时刷新后重试。
use crate::config::DeliveryConfig;
use crate::wecom::credential_store::Credentials;
use crate::wecom::error::{WecomError, WecomResult};
use crate::wecom::token::TokenManager;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://qyapi.weixin.qq.com";

/// 企业微信业务返回码，缺省视为 0。
pub fn vendor_code(body: &Value) -> i64 {
    body.get("errcode").and_then(Value::as_i64).unwrap_or(0)
}

fn vendor_message(body: &Value) -> String {
    body.get("errmsg")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendResult {
    pub success: bool,
    pub vendor_code: i64,
    pub raw: Value,
}

impl SendResult {
    pub fn from_raw(raw: Value) -> Self {
        let code = vendor_code(&raw);
        Self {
            success: code == 0,
            vendor_code: code,
            raw,
        }
    }

    pub fn errmsg(&self) -> String {
        vendor_message(&self.raw)
    }
}

#[derive(Debug, Clone)]
pub enum PostBody {
    Json(Value),
    Media { file_name: String, bytes: Vec<u8> },
}

impl PostBody {
    // multipart 表单不可复用，每次尝试重新构造。
    fn apply(&self, request: RequestBuilder) -> WecomResult<RequestBuilder> {
        match self {
            Self::Json(value) => Ok(request.json(value)),
            Self::Media { file_name, bytes } => {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str("application/octet-stream")
                    .map_err(WecomError::from_reqwest)?;
                Ok(request.multipart(Form::new().part("media", part)))
            }
        }
    }
}

#[derive(Clone)]
pub struct VendorHttp {
    client: Client,
    base_url: String,
    auth_invalid_codes: Arc<Vec<i64>>,
}

impl VendorHttp {
    pub fn new(base_url: &str, timeout: Duration, auth_invalid_codes: Vec<i64>) -> WecomResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WecomError::from_reqwest)?;
        let base_url = base_url.trim().trim_end_matches('/');
        let base_url = if base_url.is_empty() {
            DEFAULT_API_BASE_URL.to_string()
        } else if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url.to_string()
        } else {
            format!("https://{base_url}")
        };
        Ok(Self {
            client,
            base_url,
            auth_invalid_codes: Arc::new(auth_invalid_codes),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 业务码为鉴权失败时报错，其它非零码只记日志并原样返回，由调用方检查。
    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> WecomResult<Value> {
        let request = self.client.get(self.url(path)).query(params);
        let body = match execute(request).await {
            Ok(body) => body,
            Err(err) => {
                error!(path, error = %err, "wecom get request failed");
                return Err(err);
            }
        };
        let code = vendor_code(&body);
        if code == 0 {
            return Ok(body);
        }
        if self.auth_invalid_codes.contains(&code) {
            return Err(WecomError::Authentication {
                code,
                message: vendor_message(&body),
            });
        }
        warn!(path, code, "wecom get returned non-zero result: {body}");
        Ok(body)
    }

    async fn post(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
        body: &PostBody,
    ) -> WecomResult<Value> {
        let request = self
            .client
            .post(self.url(path))
            .query(&[("access_token", access_token)])
            .query(query);
        execute(body.apply(request)?).await
    }
}

async fn execute(request: RequestBuilder) -> WecomResult<Value> {
    let response: Response = request.send().await.map_err(WecomError::from_reqwest)?;
    let response = response
        .error_for_status()
        .map_err(WecomError::from_reqwest)?;
    response.json::<Value>().await.map_err(WecomError::from_reqwest)
}

#[derive(Clone)]
pub struct VendorTransport {
    http: VendorHttp,
    tokens: Arc<TokenManager>,
    credentials: Credentials,
    max_attempts: u32,
    token_invalid_codes: Arc<Vec<i64>>,
}

impl VendorTransport {
    pub fn new(
        http: VendorHttp,
        tokens: Arc<TokenManager>,
        credentials: Credentials,
        policy: &DeliveryConfig,
    ) -> Self {
        Self {
            http,
            tokens,
            credentials,
            max_attempts: policy.max_attempts.max(1),
            token_invalid_codes: Arc::new(policy.token_invalid_codes.clone()),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn get_authorized(&self, path: &str, params: &[(&str, &str)]) -> WecomResult<Value> {
        let token = self.tokens.get_token(&self.credentials).await?;
        let mut query: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 1);
        query.push(("access_token", token.as_str()));
        query.extend_from_slice(params);
        self.http.get(path, &query).await
    }

    /// 最多尝试 `max_attempts` 次；token 失效码触发一次刷新后重试，其它非零码立即返回原始结果。
    pub async fn post_with_retry(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &PostBody,
    ) -> WecomResult<SendResult> {
        let mut token = self.tokens.get_token(&self.credentials).await?;
        let mut attempt = 1;
        loop {
            let raw = match self.http.post(path, &token, query, body).await {
                Ok(raw) => raw,
                Err(err) => {
                    error!(path, attempt, error = %err, "wecom post request failed");
                    return Err(err);
                }
            };
            let result = SendResult::from_raw(raw);
            debug!(path, attempt, code = result.vendor_code, "wecom post result");
            if result.success {
                return Ok(result);
            }
            if !self.token_invalid_codes.contains(&result.vendor_code) {
                warn!(
                    path,
                    attempt,
                    code = result.vendor_code,
                    "wecom post failed: {}",
                    result.errmsg()
                );
                return Ok(result);
            }
            if attempt >= self.max_attempts {
                warn!(
                    path,
                    attempt,
                    code = result.vendor_code,
                    "access token still rejected, giving up"
                );
                self.tokens.invalidate(&self.credentials).await;
                return Ok(result);
            }
            info!(path, attempt, code = result.vendor_code, "access token rejected, refreshing");
            token = self.tokens.refresh(&self.credentials, &token).await?;
            attempt += 1;
        }
    }
}
