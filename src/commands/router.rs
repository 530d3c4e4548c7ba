// 指令路由：首个空白切分出指令名与参数，按注册顺序生成帮助文本。
use crate::commands::context::CommandContext;
use crate::commands::handlers::{self, CommandSettings};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// 小写指令名，匹配时忽略大小写。
    fn name(&self) -> &str;

    /// 帮助里展示的用法，例如 `echo <文本>`。
    fn usage(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str;

    async fn handle(&self, arg: &str, ctx: &CommandContext) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct CommandRouter {
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins(settings: CommandSettings) -> Self {
        let mut router = Self::new();
        for handler in handlers::builtins(settings) {
            router.register_arc(handler);
        }
        router
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: CommandHandler + 'static,
    {
        self.register_arc(Arc::new(handler));
    }

    /// 同名指令原位替换，帮助里的序号不变。
    pub fn register_arc(&mut self, handler: Arc<dyn CommandHandler>) {
        let name = handler.name().to_ascii_lowercase();
        match self
            .handlers
            .iter_mut()
            .find(|existing| existing.name().eq_ignore_ascii_case(&name))
        {
            Some(slot) => *slot = handler,
            None => self.handlers.push(handler),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|handler| handler.name().to_string())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn help_text(&self) -> String {
        let mut text = String::from("可用指令:\n");
        for (index, handler) in self.handlers.iter().enumerate() {
            text.push_str(&format!(
                "{}) {} - {}\n",
                index + 1,
                handler.usage(),
                handler.description()
            ));
        }
        text
    }

    /// 指令自身的错误原样向上返回，由调用方记录。
    pub async fn dispatch(&self, ctx: CommandContext) -> Result<()> {
        let help = self.help_text();
        let ctx = ctx.with_help(help.clone());
        let text = ctx.content.trim();
        if text.is_empty() {
            ctx.notify_text(help).await;
            return Ok(());
        }

        let (command, arg) = match text.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim_start()),
            None => (text, ""),
        };
        let command = command.to_lowercase();
        let Some(handler) = self.find(&command) else {
            ctx.notify_text(format!("未知指令: {command}\n\n{help}"))
                .await;
            return Ok(());
        };
        handler.handle(arg, &ctx).await
    }
}
