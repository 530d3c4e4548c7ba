// 抽象出站消息：类型 + 按类型约定的 payload，构造后不可修改。
use crate::wecom::error::{WecomError, WecomResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_TEXTCARD_BUTTON: &str = "详情";
pub const ALL_USERS: &str = "@all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Markdown,
    Textcard,
    Image,
    Voice,
    Video,
    File,
    News,
    MiniProgram,
}

impl MessageType {
    pub const ALL: [MessageType; 9] = [
        Self::Text,
        Self::Markdown,
        Self::Textcard,
        Self::Image,
        Self::Voice,
        Self::Video,
        Self::File,
        Self::News,
        Self::MiniProgram,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Textcard => "textcard",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::File => "file",
            Self::News => "news",
            Self::MiniProgram => "mini_program",
        }
    }

    /// 企业微信接口里的 msgtype 取值。
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::MiniProgram => "miniprogram_notice",
            other => other.as_str(),
        }
    }
}

impl FromStr for MessageType {
    type Err = WecomError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "textcard" => Ok(Self::Textcard),
            "image" => Ok(Self::Image),
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            "news" => Ok(Self::News),
            "mini_program" | "miniprogram_notice" => Ok(Self::MiniProgram),
            _ => Err(WecomError::UnsupportedType(raw.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub picurl: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniProgramNotice {
    pub appid: String,
    pub page: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emphasis_first_item: bool,
    #[serde(default)]
    pub content_item: Vec<MiniProgramItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniProgramItem {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    msg_type: MessageType,
    payload: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(msg_type: MessageType, payload: Map<String, Value>) -> Self {
        Self { msg_type, payload }
    }

    /// 按字符串类型名构造，未知类型直接报错。
    pub fn parse(msg_type: &str, payload: Map<String, Value>) -> WecomResult<Self> {
        Ok(Self::new(msg_type.parse()?, payload))
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::from_value(MessageType::Text, json!({ "content": content.into() }))
    }

    pub fn markdown(content: impl Into<String>) -> Self {
        Self::from_value(MessageType::Markdown, json!({ "content": content.into() }))
    }

    pub fn textcard(
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        btn: Option<&str>,
    ) -> Self {
        Self::from_value(
            MessageType::Textcard,
            json!({
                "title": title.into(),
                "description": description.into(),
                "url": url.into(),
                "btn": btn.unwrap_or(DEFAULT_TEXTCARD_BUTTON),
            }),
        )
    }

    pub fn image(media_path: impl Into<String>) -> Self {
        Self::from_value(MessageType::Image, json!({ "media_path": media_path.into() }))
    }

    pub fn voice(voice_path: impl Into<String>) -> Self {
        Self::from_value(MessageType::Voice, json!({ "voice_path": voice_path.into() }))
    }

    pub fn video(
        video_path: impl Into<String>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Self {
        let mut payload = Map::new();
        payload.insert("video_path".to_string(), Value::String(video_path.into()));
        if let Some(title) = title {
            payload.insert("title".to_string(), Value::String(title.to_string()));
        }
        if let Some(description) = description {
            payload.insert(
                "description".to_string(),
                Value::String(description.to_string()),
            );
        }
        Self::new(MessageType::Video, payload)
    }

    pub fn file(file_path: impl Into<String>) -> Self {
        Self::from_value(MessageType::File, json!({ "file_path": file_path.into() }))
    }

    pub fn news(articles: Vec<NewsArticle>) -> Self {
        Self::from_value(MessageType::News, json!({ "articles": articles }))
    }

    /// 单图文的便捷形式，发送时包装成一条 articles。
    pub fn news_single(
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        image_url: impl Into<String>,
    ) -> Self {
        Self::from_value(
            MessageType::News,
            json!({
                "title": title.into(),
                "description": description.into(),
                "url": url.into(),
                "image_url": image_url.into(),
            }),
        )
    }

    pub fn mini_program(notice: MiniProgramNotice) -> Self {
        Self::from_value(MessageType::MiniProgram, json!(notice))
    }

    fn from_value(msg_type: MessageType, value: Value) -> Self {
        let payload = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(msg_type, payload)
    }
}

/// 接收范围：成员、部门、标签任选；全部为空时发给应用可见范围内的所有人。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub users: Vec<String>,
    pub departments: Vec<String>,
    pub tags: Vec<String>,
}

impl Recipients {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            users: vec![user_id.into()],
            ..Self::default()
        }
    }

    pub fn is_all(&self) -> bool {
        self.users.is_empty() && self.departments.is_empty() && self.tags.is_empty()
    }

    pub fn apply(&self, body: &mut Map<String, Value>) {
        if self.is_all() {
            body.insert("touser".to_string(), Value::String(ALL_USERS.to_string()));
            return;
        }
        if !self.users.is_empty() {
            body.insert("touser".to_string(), Value::String(self.users.join("|")));
        }
        if !self.departments.is_empty() {
            body.insert(
                "toparty".to_string(),
                Value::String(self.departments.join("|")),
            );
        }
        if !self.tags.is_empty() {
            body.insert("totag".to_string(), Value::String(self.tags.join("|")));
        }
    }

    pub fn describe(&self) -> String {
        if self.is_all() {
            return ALL_USERS.to_string();
        }
        [&self.users, &self.departments, &self.tags]
            .iter()
            .find(|items| !items.is_empty())
            .map(|items| items.join("|"))
            .unwrap_or_else(|| ALL_USERS.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_parses_both_mini_program_spellings() {
        assert_eq!(
            "mini_program".parse::<MessageType>().expect("parse"),
            MessageType::MiniProgram
        );
        assert_eq!(
            "miniprogram_notice".parse::<MessageType>().expect("parse"),
            MessageType::MiniProgram
        );
        assert_eq!(MessageType::MiniProgram.wire_name(), "miniprogram_notice");
        assert!(matches!(
            OutboundMessage::parse("sticker", Map::new()),
            Err(WecomError::UnsupportedType(_))
        ));
    }

    #[test]
    fn textcard_defaults_button_label() {
        let message = OutboundMessage::textcard("t", "d", "https://example.com", None);
        assert_eq!(message.get_str("btn"), Some(DEFAULT_TEXTCARD_BUTTON));
        let custom = OutboundMessage::textcard("t", "d", "https://example.com", Some("查看"));
        assert_eq!(custom.get_str("btn"), Some("查看"));
    }

    #[test]
    fn recipients_default_to_all_sentinel() {
        let mut body = Map::new();
        Recipients::all().apply(&mut body);
        assert_eq!(body.get("touser"), Some(&json!("@all")));
        assert!(!body.contains_key("toparty"));

        let mut body = Map::new();
        let recipients = Recipients {
            users: vec!["u1".to_string(), "u2".to_string()],
            departments: vec!["2".to_string()],
            tags: Vec::new(),
        };
        recipients.apply(&mut body);
        assert_eq!(body.get("touser"), Some(&json!("u1|u2")));
        assert_eq!(body.get("toparty"), Some(&json!("2")));
        assert!(!body.contains_key("totag"));
        assert_eq!(recipients.describe(), "u1|u2");
    }
}
