// 单次指令调用的上下文：发起人、原始内容，以及把回复投递出去的通知端口。
use crate::wecom::message::{MiniProgramNotice, NewsArticle, OutboundMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// 回复通道。投递失败由实现方自行记录，不回传给指令。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: OutboundMessage);
}

#[derive(Clone)]
pub struct CommandContext {
    pub user_id: String,
    pub content: String,
    help: String,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CommandContext {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            help: String::new(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub(crate) fn with_help(mut self, help: String) -> Self {
        self.help = help;
        self
    }

    /// 当前路由的帮助文本，由路由器在分发时填入。
    pub fn help_text(&self) -> &str {
        &self.help
    }

    pub async fn notify(&self, message: OutboundMessage) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&self.user_id, message).await;
        }
    }

    pub async fn notify_text(&self, content: impl Into<String>) {
        self.notify(OutboundMessage::text(content)).await;
    }

    pub async fn notify_markdown(&self, content: impl Into<String>) {
        self.notify(OutboundMessage::markdown(content)).await;
    }

    pub async fn notify_textcard(
        &self,
        title: &str,
        description: &str,
        url: &str,
        btn: Option<&str>,
    ) {
        self.notify(OutboundMessage::textcard(title, description, url, btn))
            .await;
    }

    pub async fn notify_image(&self, media_path: impl Into<String>) {
        self.notify(OutboundMessage::image(media_path)).await;
    }

    pub async fn notify_voice(&self, voice_path: impl Into<String>) {
        self.notify(OutboundMessage::voice(voice_path)).await;
    }

    pub async fn notify_video(
        &self,
        video_path: impl Into<String>,
        title: Option<&str>,
        description: Option<&str>,
    ) {
        self.notify(OutboundMessage::video(video_path, title, description))
            .await;
    }

    pub async fn notify_file(&self, file_path: impl Into<String>) {
        self.notify(OutboundMessage::file(file_path)).await;
    }

    pub async fn notify_news(&self, articles: Vec<NewsArticle>) {
        self.notify(OutboundMessage::news(articles)).await;
    }

    pub async fn notify_mini_program(&self, notice: MiniProgramNotice) {
        self.notify(OutboundMessage::mini_program(notice)).await;
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::wecom::message::MessageType;

    #[tokio::test]
    async fn helpers_build_typed_messages_for_the_caller() {
        let recorder = Arc::new(RecordingNotifier::default());
        let ctx = CommandContext::new("u1", "whatever").with_notifier(recorder.clone());
        ctx.notify_text("hi").await;
        ctx.notify_textcard("t", "d", "https://e.com", None).await;
        ctx.notify_video("clip.mp4", Some("标题"), None).await;

        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(user, _)| user == "u1"));
        assert_eq!(sent[0].1.msg_type(), MessageType::Text);
        assert_eq!(sent[1].1.get_str("btn"), Some("详情"));
        assert_eq!(sent[2].1.get_str("title"), Some("标题"));
        assert_eq!(sent[2].1.get_str("description"), None);
    }

    #[tokio::test]
    async fn missing_notifier_skips_silently() {
        let ctx = CommandContext::new("u1", "ping");
        ctx.notify_text("nobody listens").await;
        assert_eq!(ctx.help_text(), "");
    }
}
