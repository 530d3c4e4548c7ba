// 内置指令：help / ping / time / echo / msgtest / longtask。
use crate::commands::context::CommandContext;
use crate::commands::router::CommandHandler;
use crate::config::CommandsConfig;
use crate::wecom::message::{MiniProgramItem, MiniProgramNotice, NewsArticle};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEMO_URL: &str = "https://github.com/yanxiang1120/wecom_assistant";
const DEMO_PICURL: &str = "https://avatars.githubusercontent.com/u/4798762?v=4";

const MEETING_MARKDOWN: &str = "`markdown` 通知\
\n您的会议室已经预定，稍后会同步到`邮箱`\
\n>**事项详情**\
\n>事　项：<font color=\"info\">开会</font>\
\n>组织者：@miglioguan\
\n>参与者：@miglioguan、@kunliu、@jamdeezhou、@kanexiong、@kisonwang\
\n>\
\n>会议室：<font color=\"info\">广州TIT 1楼 301</font>\
\n>日　期：<font color=\"warning\">2026年2月10日</font>\
\n>时　间：<font color=\"comment\">上午9:00-11:00</font>\
\n>\
\n>请准时参加会议。\
\n>\
\n>如需修改会议信息，请点击：[修改会议信息](https://github.com/yanxiang1120/wecom_assistant)";

#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub longtask_delay: Duration,
    pub demo_asset_dir: PathBuf,
    pub timezone: Option<Tz>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self::from_config(&CommandsConfig::default())
    }
}

impl CommandSettings {
    pub fn from_config(config: &CommandsConfig) -> Self {
        let timezone = config
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .and_then(|name| match name.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(err) => {
                    warn!("时区配置无效，使用本机时区: {name}, {err}");
                    None
                }
            });
        Self {
            longtask_delay: Duration::from_secs(config.longtask_delay_s),
            demo_asset_dir: PathBuf::from(&config.demo_asset_dir),
            timezone,
        }
    }

    fn asset(&self, name: &str) -> String {
        self.demo_asset_dir.join(name).to_string_lossy().to_string()
    }
}

pub fn builtins(settings: CommandSettings) -> Vec<Arc<dyn CommandHandler>> {
    vec![
        Arc::new(HelpCommand),
        Arc::new(PingCommand),
        Arc::new(TimeCommand {
            timezone: settings.timezone,
        }),
        Arc::new(EchoCommand),
        Arc::new(MsgTestCommand {
            settings: settings.clone(),
        }),
        Arc::new(LongTaskCommand {
            delay: settings.longtask_delay,
        }),
    ]
}

pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn description(&self) -> &str {
        "查看帮助"
    }

    async fn handle(&self, _arg: &str, ctx: &CommandContext) -> Result<()> {
        ctx.notify_text(ctx.help_text()).await;
        Ok(())
    }
}

pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "你还活着吗"
    }

    async fn handle(&self, _arg: &str, ctx: &CommandContext) -> Result<()> {
        ctx.notify_text("pong").await;
        Ok(())
    }
}

pub struct TimeCommand {
    timezone: Option<Tz>,
}

impl TimeCommand {
    fn now_text(&self) -> String {
        match self.timezone {
            Some(tz) => Utc::now().with_timezone(&tz).format(TIME_FORMAT).to_string(),
            None => Local::now().format(TIME_FORMAT).to_string(),
        }
    }
}

#[async_trait]
impl CommandHandler for TimeCommand {
    fn name(&self) -> &str {
        "time"
    }

    fn description(&self) -> &str {
        "返回服务当前时间"
    }

    async fn handle(&self, _arg: &str, ctx: &CommandContext) -> Result<()> {
        ctx.notify_text(format!("当前服务时间: {}", self.now_text()))
            .await;
        Ok(())
    }
}

pub struct EchoCommand;

#[async_trait]
impl CommandHandler for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    fn usage(&self) -> &str {
        "echo <文本>"
    }

    fn description(&self) -> &str {
        "回显文本"
    }

    async fn handle(&self, arg: &str, ctx: &CommandContext) -> Result<()> {
        if arg.is_empty() {
            ctx.notify_text("用法: echo 你的内容").await;
        } else {
            ctx.notify_text(arg).await;
        }
        Ok(())
    }
}

/// 依次发出每一种消息类型，素材取自 `demo_asset_dir`。
pub struct MsgTestCommand {
    settings: CommandSettings,
}

#[async_trait]
impl CommandHandler for MsgTestCommand {
    fn name(&self) -> &str {
        "msgtest"
    }

    fn description(&self) -> &str {
        "消息模板测试"
    }

    async fn handle(&self, _arg: &str, ctx: &CommandContext) -> Result<()> {
        ctx.notify_text("消息模板测试开始").await;
        ctx.notify_markdown(MEETING_MARKDOWN).await;
        ctx.notify_textcard(
            "任务卡片通知",
            "这是一个 textcard 示例消息。",
            DEMO_URL,
            Some("查看"),
        )
        .await;
        ctx.notify_image(self.settings.asset("goodluck.png")).await;
        ctx.notify_voice(self.settings.asset("voice.amr")).await;
        ctx.notify_video(
            self.settings.asset("video.mp4"),
            Some("视频示例"),
            Some("这是一个 video 示例消息。"),
        )
        .await;
        ctx.notify_file(self.settings.asset("record.csv")).await;
        let articles = (1..=4)
            .map(|index| NewsArticle {
                title: format!("标题{index}"),
                description: format!("简介{index}"),
                url: DEMO_URL.to_string(),
                picurl: DEMO_PICURL.to_string(),
            })
            .collect();
        ctx.notify_news(articles).await;
        ctx.notify_mini_program(MiniProgramNotice {
            appid: "wx123123123123123".to_string(),
            page: "pages/index?userid=zhangsan".to_string(),
            title: "会议室预订成功通知".to_string(),
            description: "4月27日 16:16".to_string(),
            emphasis_first_item: true,
            content_item: vec![
                MiniProgramItem {
                    key: "会议室".to_string(),
                    value: "402".to_string(),
                },
                MiniProgramItem {
                    key: "会议地点".to_string(),
                    value: "广州TIT-402会议室".to_string(),
                },
            ],
        })
        .await;
        Ok(())
    }
}

pub struct LongTaskCommand {
    delay: Duration,
}

#[async_trait]
impl CommandHandler for LongTaskCommand {
    fn name(&self) -> &str {
        "longtask"
    }

    fn description(&self) -> &str {
        "耗时任务模板"
    }

    async fn handle(&self, _arg: &str, ctx: &CommandContext) -> Result<()> {
        let started = Instant::now();
        ctx.notify_text("任务开始执行。。。").await;
        tokio::time::sleep(self.delay).await;
        let seconds = started.elapsed().as_secs();
        info!(user_id = %ctx.user_id, seconds, "longtask finished");
        ctx.notify_markdown(format!("**任务执行完成**\n耗时：`{seconds}` 秒"))
            .await;
        Ok(())
    }
}
