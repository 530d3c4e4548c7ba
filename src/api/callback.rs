// 企业微信回调入口：URL 校验与消息接收。消息只做解码和投递到后台，立即应答 success。
use crate::state::AppState;
use crate::wecom::callback::{decrypt_payload, parse_xml_fields, verify_signature, InboundEvent};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use chrono_tz::Asia::Shanghai;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    msg_signature: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    echostr: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/wecom/callback", get(verify_url).post(receive_message))
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn verify_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<String, Response> {
    let echostr = query.echostr.trim();
    if echostr.is_empty() {
        warn!("URL 校验失败: 缺少 echostr");
        return Err(error_response(StatusCode::BAD_REQUEST, "echostr is required"));
    }
    let signed = !query.msg_signature.trim().is_empty();
    if !signed {
        return Ok(echostr.to_string());
    }
    let Some(aes_key) = state.callback.aes_key.as_deref() else {
        error!("URL 校验失败: 请求为加密模式但未配置 EncodingAESKey");
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "encrypted mode requested but crypto is disabled",
        ));
    };
    if !verify_signature(
        &state.callback.token,
        &query.timestamp,
        &query.nonce,
        echostr,
        &query.msg_signature,
    ) {
        error!("URL 校验失败: 签名不匹配");
        return Err(error_response(StatusCode::BAD_REQUEST, "signature mismatch"));
    }
    decrypt_payload(echostr, aes_key, Some(&state.callback.receive_id)).map_err(|err| {
        error!("URL 校验失败: 解密 echostr 出错: {err}");
        error_response(StatusCode::BAD_REQUEST, &format!("verify failed: {err}"))
    })
}

async fn receive_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    body: String,
) -> Result<&'static str, Response> {
    if body.trim().is_empty() {
        warn!("消息回调失败: 请求体为空");
        return Err(error_response(StatusCode::BAD_REQUEST, "request body is empty"));
    }
    let xml = open_envelope(&state, &query, &body)?;
    debug!("收到回调消息: {xml}");
    // 信封已通过校验，内容无法识别时仍应答 success，否则企业微信会反复重推。
    let event = match InboundEvent::from_xml(&xml) {
        Ok(event) => event,
        Err(err) => {
            warn!("消息回调内容无法识别，已忽略: {err}");
            return Ok("success");
        }
    };
    info!(
        user_id = %event.from_user,
        msg_type = %event.msg_type,
        msg_time = %event.create_time.map(format_create_time).unwrap_or_default(),
        "收到回调: {}",
        event.content.as_deref().unwrap_or("")
    );
    // 不等待后台任务，回调立即应答。
    if state.dispatcher.accept(event).is_some() {
        debug!("指令已转入后台执行");
    }
    Ok("success")
}

/// 加密信封需验签后解密；未配置 AES 时只接受明文 XML。
fn open_envelope(state: &AppState, query: &CallbackQuery, body: &str) -> Result<String, Response> {
    let fields = parse_xml_fields(body).map_err(|err| {
        warn!("消息回调 XML 无效: {err}");
        error_response(StatusCode::BAD_REQUEST, "invalid xml payload")
    })?;
    let encrypted = fields.get("Encrypt").map(String::as_str);
    match (encrypted, state.callback.aes_key.as_deref()) {
        (Some(encrypted), Some(aes_key)) => {
            if !verify_signature(
                &state.callback.token,
                &query.timestamp,
                &query.nonce,
                encrypted,
                &query.msg_signature,
            ) {
                error!("消息回调失败: 签名不匹配");
                return Err(error_response(StatusCode::BAD_REQUEST, "signature mismatch"));
            }
            decrypt_payload(encrypted, aes_key, Some(&state.callback.receive_id)).map_err(|err| {
                error!("消息回调失败: 解密出错: {err}");
                error_response(StatusCode::BAD_REQUEST, &format!("decrypt failed: {err}"))
            })
        }
        (Some(_), None) => {
            error!("消息回调失败: 收到加密消息但未配置 EncodingAESKey");
            Err(error_response(
                StatusCode::BAD_REQUEST,
                "encrypted mode requested but crypto is disabled",
            ))
        }
        (None, Some(_)) => {
            error!("消息回调失败: 已启用加密但收到明文消息");
            Err(error_response(StatusCode::BAD_REQUEST, "encrypted payload is required"))
        }
        (None, None) => Ok(body.to_string()),
    }
}

fn format_create_time(seconds: i64) -> String {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .map(|time| {
            time.with_timezone(&Shanghai)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_default()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": { "message": message } }))).into_response()
}
