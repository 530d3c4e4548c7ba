// 进程级共享状态：在启动时组装 token 存储、发送方、指令路由与调度器。
use crate::commands::{CommandRouter, CommandSettings, Notifier};
use crate::config::Config;
use crate::dispatch::{DeliveryNotifier, Dispatcher, UnconfiguredNotifier};
use crate::wecom::credential_store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
use crate::wecom::delivery::WecomSender;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// 回调校验所需的配置。`aes_key` 为空时按明文模式处理。
#[derive(Debug, Clone)]
pub struct CallbackSettings {
    pub token: String,
    pub aes_key: Option<String>,
    pub receive_id: String,
}

impl CallbackSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token: config.wecom.token().unwrap_or_default().to_string(),
            aes_key: config.wecom.encoding_aes_key().map(str::to_string),
            receive_id: config.wecom.corp_id().unwrap_or_default().to_string(),
        }
    }

    pub fn has_crypto(&self) -> bool {
        self.aes_key.is_some()
    }
}

pub struct AppState {
    pub config: Config,
    pub callback: CallbackSettings,
    pub dispatcher: Dispatcher,
    pub sender: Option<Arc<WecomSender>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn CredentialStore> = if config.storage.db_path.trim().is_empty() {
            info!("未配置 token 存储路径，仅使用内存缓存");
            Arc::new(MemoryCredentialStore::new())
        } else {
            Arc::new(SqliteCredentialStore::new(config.storage.db_path.trim()))
        };
        let sender =
            WecomSender::from_config(&config.wecom, &config.delivery, store)?.map(Arc::new);
        let notifier: Arc<dyn Notifier> = match &sender {
            Some(sender) => Arc::new(DeliveryNotifier::new(sender.clone())),
            None => {
                warn!("发送方未配置（corp_id/agent_id/agent_secret），指令回复将被丢弃");
                Arc::new(UnconfiguredNotifier)
            }
        };
        let router = Arc::new(CommandRouter::with_builtins(CommandSettings::from_config(
            &config.commands,
        )));
        Ok(Self::with_parts(
            config,
            Dispatcher::new(router, notifier),
            sender,
        ))
    }

    pub fn with_parts(config: Config, dispatcher: Dispatcher, sender: Option<Arc<WecomSender>>) -> Self {
        let callback = CallbackSettings::from_config(&config);
        Self {
            config,
            callback,
            dispatcher,
            sender,
        }
    }
}
