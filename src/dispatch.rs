// 回调事件与指令执行之间的调度：文本消息转入后台任务，回调立即返回。
use crate::commands::{CommandContext, CommandRouter, Notifier};
use crate::wecom::callback::InboundEvent;
use crate::wecom::delivery::MessagingApi;
use crate::wecom::message::{OutboundMessage, Recipients};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 把指令产出的消息交给企业微信投递；单条失败只记日志，不打断指令。
pub struct DeliveryNotifier {
    api: Arc<dyn MessagingApi>,
}

impl DeliveryNotifier {
    pub fn new(api: Arc<dyn MessagingApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Notifier for DeliveryNotifier {
    async fn notify(&self, user_id: &str, message: OutboundMessage) {
        let msg_type = message.msg_type();
        match self.api.deliver(&message, &Recipients::user(user_id)).await {
            Ok(result) if result.success => {}
            Ok(result) => warn!(
                user_id,
                %msg_type,
                code = result.vendor_code,
                "消息投递被拒: {}",
                result.errmsg()
            ),
            Err(err) => error!(user_id, %msg_type, "消息投递失败: {err}"),
        }
    }
}

/// 未配置发送方时使用：只记录，不投递。
pub struct UnconfiguredNotifier;

#[async_trait]
impl Notifier for UnconfiguredNotifier {
    async fn notify(&self, user_id: &str, message: OutboundMessage) {
        warn!(
            user_id,
            msg_type = %message.msg_type(),
            "发送方未配置，丢弃回复"
        );
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<CommandRouter>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(router: Arc<CommandRouter>, notifier: Arc<dyn Notifier>) -> Self {
        Self { router, notifier }
    }

    /// 非文本事件忽略；文本事件在后台执行，返回的句柄仅供需要等待结果的调用方使用。
    pub fn accept(&self, event: InboundEvent) -> Option<JoinHandle<()>> {
        if !event.is_text() {
            info!(
                user_id = %event.from_user,
                msg_type = %event.msg_type,
                event = event.event.as_deref().unwrap_or(""),
                "忽略非文本回调"
            );
            return None;
        }
        let content = event.content.unwrap_or_default();
        let user_id = event.from_user;
        info!(%user_id, msg_id = event.msg_id.as_deref().unwrap_or(""), "收到文本消息: {content}");
        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            dispatcher.run(&user_id, &content).await;
        }))
    }

    /// 指令错误在这里兜底，带上用户与原文记录。
    pub async fn run(&self, user_id: &str, content: &str) {
        let ctx = CommandContext::new(user_id, content).with_notifier(self.notifier.clone());
        match self.router.dispatch(ctx).await {
            Ok(()) => info!(user_id, "指令处理完成: {content}"),
            Err(err) => error!(user_id, "指令处理失败: {content}, {err:#}"),
        }
    }
}
