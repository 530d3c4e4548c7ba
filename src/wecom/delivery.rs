// 出站消息投递：把抽象消息转换成企业微信 message/send 请求，素材类消息先上传换取 media_id。
use crate::config::{DeliveryConfig, WecomConfig};
use crate::wecom::credential_store::{CredentialStore, Credentials};
use crate::wecom::error::{WecomError, WecomResult};
use crate::wecom::media::{self, MediaFile, MediaKind};
use crate::wecom::message::{
    MessageType, MiniProgramNotice, NewsArticle, OutboundMessage, Recipients,
};
use crate::wecom::token::TokenManager;
use crate::wecom::transport::{PostBody, SendResult, VendorHttp, VendorTransport};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const MESSAGE_SEND_PATH: &str = "/cgi-bin/message/send";
const MEDIA_UPLOAD_PATH: &str = "/cgi-bin/media/upload";
const IMAGE_UPLOAD_PATH: &str = "/cgi-bin/media/uploadimg";

/// 消息发送能力集合；目前只有企业微信一种实现，按接口替换。
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage, to: &Recipients) -> WecomResult<SendResult>;

    /// 上传临时素材（3 天有效），返回 media_id。
    async fn upload_media(&self, kind: MediaKind, path: &Path) -> WecomResult<String>;

    /// 上传图片换取永久 URL，用于图文消息的 picurl。
    async fn upload_image(&self, path: &Path) -> WecomResult<String>;

    async fn send_text(&self, content: &str, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::text(content), to).await
    }

    async fn send_markdown(&self, content: &str, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::markdown(content), to).await
    }

    async fn send_textcard(
        &self,
        title: &str,
        description: &str,
        url: &str,
        btn: Option<&str>,
        to: &Recipients,
    ) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::textcard(title, description, url, btn), to)
            .await
    }

    async fn send_image(&self, path: &str, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::image(path), to).await
    }

    async fn send_voice(&self, path: &str, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::voice(path), to).await
    }

    async fn send_video(
        &self,
        path: &str,
        title: Option<&str>,
        description: Option<&str>,
        to: &Recipients,
    ) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::video(path, title, description), to)
            .await
    }

    async fn send_file(&self, path: &str, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::file(path), to).await
    }

    async fn send_news(&self, articles: Vec<NewsArticle>, to: &Recipients) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::news(articles), to).await
    }

    async fn send_mini_program(
        &self,
        notice: MiniProgramNotice,
        to: &Recipients,
    ) -> WecomResult<SendResult> {
        self.deliver(&OutboundMessage::mini_program(notice), to).await
    }
}

#[derive(Clone)]
pub struct WecomSender {
    transport: VendorTransport,
    agent_id: String,
}

impl WecomSender {
    pub fn new(transport: VendorTransport, agent_id: impl Into<String>) -> Self {
        Self {
            transport,
            agent_id: agent_id.into(),
        }
    }

    /// 发送方凭据不完整时返回 None（仅接收回调、不回消息）。
    pub fn from_config(
        wecom: &WecomConfig,
        delivery: &DeliveryConfig,
        store: Arc<dyn CredentialStore>,
    ) -> WecomResult<Option<Self>> {
        let Some((credentials, agent_id)) = wecom.sender_credentials() else {
            return Ok(None);
        };
        let timeout = wecom
            .http_timeout()
            .map_err(|err| WecomError::Validation(err.to_string()))?;
        let http = VendorHttp::new(
            &wecom.api_base_url,
            timeout,
            delivery.auth_invalid_codes.clone(),
        )?;
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            store,
            delivery.default_token_ttl_s,
        ));
        let transport = VendorTransport::new(http, tokens, credentials, delivery);
        Ok(Some(Self::new(transport, agent_id)))
    }

    pub fn transport(&self) -> &VendorTransport {
        &self.transport
    }

    pub fn credentials(&self) -> &Credentials {
        self.transport.credentials()
    }

    pub async fn get_token(&self) -> WecomResult<String> {
        self.transport.tokens().get_token(self.credentials()).await
    }

    fn agent_id_value(&self) -> Value {
        match self.agent_id.trim().parse::<i64>() {
            Ok(id) => json!(id),
            Err(_) => json!(self.agent_id.trim()),
        }
    }

    async fn build_block(&self, message: &OutboundMessage) -> WecomResult<Value> {
        let msg_type = message.msg_type();
        match msg_type {
            MessageType::Text | MessageType::Markdown => Ok(json!({
                "content": required(message, "content")?,
            })),
            MessageType::Textcard => Ok(json!({
                "title": required(message, "title")?,
                "description": required(message, "description")?,
                "url": required(message, "url")?,
                "btntxt": message
                    .get_str("btn")
                    .unwrap_or(crate::wecom::message::DEFAULT_TEXTCARD_BUTTON),
            })),
            MessageType::Image => {
                let path = media_path(message, "media_path")?;
                let media_id = self.upload_media(MediaKind::Image, &path).await?;
                Ok(json!({ "media_id": media_id }))
            }
            MessageType::Voice => {
                let path = media_path(message, "voice_path")?;
                let media_id = self.upload_media(MediaKind::Voice, &path).await?;
                Ok(json!({ "media_id": media_id }))
            }
            MessageType::Video => {
                let path = media_path(message, "video_path")?;
                let media_id = self.upload_media(MediaKind::Video, &path).await?;
                let mut block = Map::new();
                block.insert("media_id".to_string(), Value::String(media_id));
                for key in ["title", "description"] {
                    if let Some(value) = message.get_str(key).filter(|value| !value.is_empty()) {
                        block.insert(key.to_string(), Value::String(value.to_string()));
                    }
                }
                Ok(Value::Object(block))
            }
            MessageType::File => {
                let path = media_path(message, "file_path")?;
                let media_id = self.upload_media(MediaKind::File, &path).await?;
                Ok(json!({ "media_id": media_id }))
            }
            MessageType::News => news_block(message),
            MessageType::MiniProgram => Ok(json!({
                "appid": required(message, "appid")?,
                "page": required(message, "page")?,
                "title": required(message, "title")?,
                "description": message.get_str("description").unwrap_or_default(),
                "emphasis_first_item": message
                    .payload()
                    .get("emphasis_first_item")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                "content_item": message
                    .payload()
                    .get("content_item")
                    .cloned()
                    .unwrap_or_else(|| json!([])),
            })),
        }
    }

    async fn validated_media(&self, kind: MediaKind, path: &Path) -> WecomResult<MediaFile> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || media::check_kind(kind, path))
            .await
            .map_err(|err| WecomError::Validation(format!("media check aborted: {err}")))?
    }
}

#[async_trait]
impl MessagingApi for WecomSender {
    async fn deliver(&self, message: &OutboundMessage, to: &Recipients) -> WecomResult<SendResult> {
        let msg_type = message.msg_type();
        let block = self.build_block(message).await?;
        let mut body = Map::new();
        body.insert(
            "msgtype".to_string(),
            Value::String(msg_type.wire_name().to_string()),
        );
        body.insert("agentid".to_string(), self.agent_id_value());
        to.apply(&mut body);
        body.insert(msg_type.wire_name().to_string(), block);
        info!(msg_type = %msg_type, target = %to.describe(), "发送企业微信消息");
        self.transport
            .post_with_retry(MESSAGE_SEND_PATH, &[], &PostBody::Json(Value::Object(body)))
            .await
    }

    async fn upload_media(&self, kind: MediaKind, path: &Path) -> WecomResult<String> {
        let media = self.validated_media(kind, path).await?;
        let result = self
            .transport
            .post_with_retry(
                MEDIA_UPLOAD_PATH,
                &[("type", kind.as_str())],
                &PostBody::Media {
                    file_name: media.file_name,
                    bytes: media.bytes,
                },
            )
            .await?;
        result
            .raw
            .get("media_id")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                WecomError::Validation(format!(
                    "{} 上传失败: errcode={}, errmsg={}",
                    kind.as_str(),
                    result.vendor_code,
                    result.errmsg()
                ))
            })
    }

    async fn upload_image(&self, path: &Path) -> WecomResult<String> {
        let media = self.validated_media(MediaKind::Image, path).await?;
        let result = self
            .transport
            .post_with_retry(
                IMAGE_UPLOAD_PATH,
                &[],
                &PostBody::Media {
                    file_name: media.file_name,
                    bytes: media.bytes,
                },
            )
            .await?;
        let url = result
            .raw
            .get("url")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                WecomError::Validation(format!(
                    "图片上传失败: errcode={}, errmsg={}",
                    result.vendor_code,
                    result.errmsg()
                ))
            })?;
        info!("图片上传成功: {}", path.display());
        Ok(url)
    }
}

fn required<'a>(message: &'a OutboundMessage, field: &'static str) -> WecomResult<&'a str> {
    message.get_str(field).ok_or(WecomError::MissingField {
        msg_type: message.msg_type().as_str(),
        field,
    })
}

fn media_path(message: &OutboundMessage, field: &'static str) -> WecomResult<PathBuf> {
    message
        .get_str(field)
        .or_else(|| message.get_str("media_path"))
        .map(PathBuf::from)
        .ok_or(WecomError::MissingField {
            msg_type: message.msg_type().as_str(),
            field,
        })
}

fn news_block(message: &OutboundMessage) -> WecomResult<Value> {
    if let Some(articles) = message.payload().get("articles") {
        if !articles.as_array().is_some_and(|items| !items.is_empty()) {
            return Err(WecomError::MissingField {
                msg_type: "news",
                field: "articles",
            });
        }
        return Ok(json!({ "articles": articles }));
    }
    let article = NewsArticle {
        title: required(message, "title")?.to_string(),
        description: message.get_str("description").unwrap_or_default().to_string(),
        url: required(message, "url")?.to_string(),
        picurl: message
            .get_str("image_url")
            .or_else(|| message.get_str("picurl"))
            .unwrap_or_default()
            .to_string(),
    };
    Ok(json!({ "articles": [article] }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wecom::credential_store::{MemoryCredentialStore, TokenRecord};
    use chrono::Utc;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn sender(server: &MockServer) -> WecomSender {
        let creds = Credentials::new("corp", "secret");
        let store = MemoryCredentialStore::with_record(TokenRecord {
            credential_key: creds.credential_key(),
            token: "tok".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        });
        let delivery = DeliveryConfig::default();
        let http = VendorHttp::new(
            &server.base_url(),
            Duration::from_secs(5),
            delivery.auth_invalid_codes.clone(),
        )
        .expect("http");
        let tokens = Arc::new(TokenManager::new(http.clone(), Arc::new(store), 7200));
        WecomSender::new(VendorTransport::new(http, tokens, creds, &delivery), "1000002")
    }

    fn ok_send<'a>(server: &'a MockServer, fragment: Value) -> httpmock::Mock<'a> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/cgi-bin/message/send")
                .query_param("access_token", "tok")
                .json_body_includes(fragment.to_string());
            then.status(200).json_body(json!({"errcode": 0, "errmsg": "ok"}));
        })
    }

    #[tokio::test]
    async fn text_to_user_builds_vendor_body() {
        let server = MockServer::start();
        let send = ok_send(
            &server,
            json!({"msgtype": "text", "agentid": 1000002, "touser": "u1", "text": {"content": "hi"}}),
        );
        let result = sender(&server)
            .send_text("hi", &Recipients::user("u1"))
            .await
            .expect("send");
        assert!(result.success);
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn no_recipients_sends_to_all_sentinel() {
        let server = MockServer::start();
        let send = ok_send(&server, json!({"touser": "@all", "markdown": {"content": "**x**"}}));
        sender(&server)
            .send_markdown("**x**", &Recipients::all())
            .await
            .expect("send");
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn textcard_maps_button_label() {
        let server = MockServer::start();
        let send = ok_send(
            &server,
            json!({"textcard": {"title": "t", "description": "d", "url": "https://e.com", "btntxt": "详情"}}),
        );
        sender(&server)
            .deliver(
                &OutboundMessage::textcard("t", "d", "https://e.com", None),
                &Recipients::user("u1"),
            )
            .await
            .expect("send");
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn image_is_uploaded_before_send() {
        let server = MockServer::start();
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/cgi-bin/media/upload")
                .query_param("type", "image")
                .query_param("access_token", "tok");
            then.status(200)
                .json_body(json!({"errcode": 0, "type": "image", "media_id": "MEDIA_1"}));
        });
        let send = ok_send(&server, json!({"msgtype": "image", "image": {"media_id": "MEDIA_1"}}));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("goodluck.png");
        std::fs::write(&path, vec![1u8; 128]).expect("fixture");

        let result = sender(&server)
            .send_image(&path.to_string_lossy(), &Recipients::user("u1"))
            .await
            .expect("send");
        assert!(result.success);
        upload.assert_calls(1);
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn invalid_media_fails_without_any_request() {
        let server = MockServer::start();
        let any = server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({"errcode": 0}));
        });
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("anim.gif");
        std::fs::write(&path, vec![1u8; 128]).expect("fixture");

        let err = sender(&server)
            .send_image(&path.to_string_lossy(), &Recipients::user("u1"))
            .await
            .expect_err("gif rejected");
        assert!(matches!(err, WecomError::Validation(_)));
        any.assert_calls(0);
    }

    #[tokio::test]
    async fn single_article_news_is_wrapped_in_list() {
        let server = MockServer::start();
        let send = ok_send(
            &server,
            json!({"news": {"articles": [{"title": "t", "description": "d", "url": "https://e.com", "picurl": "https://e.com/p.png"}]}}),
        );
        sender(&server)
            .deliver(
                &OutboundMessage::news_single("t", "d", "https://e.com", "https://e.com/p.png"),
                &Recipients::user("u1"),
            )
            .await
            .expect("send");
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn mini_program_uses_notice_wire_name() {
        let server = MockServer::start();
        let send = ok_send(
            &server,
            json!({"msgtype": "miniprogram_notice", "miniprogram_notice": {"appid": "wx1", "page": "pages/index", "title": "会议"}}),
        );
        let notice = MiniProgramNotice {
            appid: "wx1".to_string(),
            page: "pages/index".to_string(),
            title: "会议".to_string(),
            description: String::new(),
            emphasis_first_item: true,
            content_item: Vec::new(),
        };
        sender(&server)
            .send_mini_program(notice, &Recipients::user("u1"))
            .await
            .expect("send");
        send.assert_calls(1);
    }

    #[tokio::test]
    async fn missing_payload_field_is_reported() {
        let server = MockServer::start();
        let message = OutboundMessage::new(MessageType::Textcard, Map::new());
        let err = sender(&server)
            .deliver(&message, &Recipients::user("u1"))
            .await
            .expect_err("missing title");
        assert!(matches!(
            err,
            WecomError::MissingField {
                msg_type: "textcard",
                field: "title"
            }
        ));
    }

    #[tokio::test]
    async fn upload_image_returns_permanent_url() {
        let server = MockServer::start();
        let upload = server.mock(|when, then| {
            when.method(POST).path("/cgi-bin/media/uploadimg");
            then.status(200)
                .json_body(json!({"errcode": 0, "errmsg": "ok", "url": "https://wework.qpic.cn/x"}));
        });
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.jpg");
        std::fs::write(&path, vec![1u8; 64]).expect("fixture");

        let url = sender(&server).upload_image(&path).await.expect("upload");
        assert_eq!(url, "https://wework.qpic.cn/x");
        upload.assert_calls(1);
    }
}
