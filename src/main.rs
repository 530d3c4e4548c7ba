// 服务入口：读取配置、初始化日志、组装状态并启动回调服务。
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wecom_bridge::config::{load_config, Config};
use wecom_bridge::logging::init_tracing;
use wecom_bridge::shutdown::shutdown_signal;
use wecom_bridge::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志尚未初始化，配置错误只能直接写 stderr。
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("配置加载失败，服务无法启动: {err}");
            return Err(err.into());
        }
    };
    // guard 必须活到进程结束，否则文件日志丢失。
    let _log_guard = init_tracing(&config.observability);

    let addr = bind_address(&config);
    let state = match AppState::new(config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!("配置无效，服务无法启动: {err}");
            return Err(err);
        }
    };

    let app = wecom_bridge::build_router(state).layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!("企业微信回调服务已启动: http://{addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!("服务运行异常: {err}");
    }
    Ok(())
}

fn bind_address(config: &Config) -> String {
    format!("{}:{}", config.server.host, config.server.port)
}
