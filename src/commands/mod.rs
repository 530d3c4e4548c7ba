// 文本指令层：解析、路由与内置指令。
pub mod context;
pub mod handlers;
pub mod router;

pub use context::{CommandContext, Notifier};
pub use handlers::CommandSettings;
pub use router::{CommandHandler, CommandRouter};
