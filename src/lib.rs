// Library entrypoint for integration tests and the service binary.
mod api;
mod core;
pub mod commands;
pub mod dispatch;
pub mod wecom;

pub use crate::api::build_router;
pub use crate::core::{config, logging, shutdown, state};
