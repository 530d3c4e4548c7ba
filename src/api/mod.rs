// HTTP 路由汇总：健康检查与企业微信回调。
pub mod callback;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new().merge(callback::router()).with_state(state)
}
