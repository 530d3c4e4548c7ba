// 企业微信对接层：凭据、token、HTTP 执行、素材校验、消息投递与回调解码。
pub mod callback;
pub mod credential_store;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod media;
pub mod message;
pub mod token;
pub mod transport;

pub use delivery::{MessagingApi, WecomSender};
pub use error::{WecomError, WecomResult};
pub use message::{MessageType, OutboundMessage, Recipients};
