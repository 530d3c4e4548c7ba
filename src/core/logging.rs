// 日志初始化：标准输出 + 按天滚动的文件日志。
use crate::config::ObservabilityConfig;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_PREFIX: &str = "service.log";
const DEFAULT_BACKUP_DAYS: usize = 30;

/// 返回的 guard 需在进程生命周期内持有，丢弃后文件日志停止刷盘。
pub fn init_tracing(config: &ObservabilityConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(&config.log_level)));

    let (file_layer, guard) = match build_file_appender(config) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(err) => {
            // 订阅器尚未安装，只能直接输出到 stderr。
            eprintln!("文件日志初始化失败，仅输出到控制台: {err}");
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn build_file_appender(config: &ObservabilityConfig) -> anyhow::Result<RollingFileAppender> {
    let dir = config.log_dir.trim();
    let dir = if dir.is_empty() { "logs" } else { dir };
    std::fs::create_dir_all(Path::new(dir))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(backup_days(config.log_backup_days))
        .build(dir)?;
    Ok(appender)
}

fn backup_days(raw: i64) -> usize {
    usize::try_from(raw)
        .ok()
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_BACKUP_DAYS)
}

pub fn normalize_level(raw: &str) -> String {
    let level = raw.trim().to_ascii_lowercase();
    let level = match level.as_str() {
        "warning" => "warn",
        "critical" | "fatal" => "error",
        other => other,
    };
    match level.parse::<tracing::Level>() {
        Ok(_) => level.to_string(),
        Err(_) => "info".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_normalized() {
        assert_eq!(normalize_level("INFO"), "info");
        assert_eq!(normalize_level(" Warning "), "warn");
        assert_eq!(normalize_level("CRITICAL"), "error");
        assert_eq!(normalize_level("verbose"), "info");
        assert_eq!(normalize_level(""), "info");
    }

    #[test]
    fn non_positive_backup_days_fall_back() {
        assert_eq!(backup_days(7), 7);
        assert_eq!(backup_days(0), DEFAULT_BACKUP_DAYS);
        assert_eq!(backup_days(-3), DEFAULT_BACKUP_DAYS);
    }
}
