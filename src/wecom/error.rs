// 企业微信调用链路的错误分类：鉴权、传输、校验与类型错误分开上报，调用方按类别决定是否重试。
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WecomError {
    #[error("wecom rejected credentials: errcode={code}, errmsg={message}")]
    Authentication { code: i64, message: String },

    #[error("wecom access token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("wecom http status error: {status}")]
    HttpStatus {
        status: u16,
        #[source]
        source: reqwest::Error,
    },

    #[error("wecom connection error")]
    Connection {
        #[source]
        source: reqwest::Error,
    },

    #[error("wecom request timed out")]
    Timeout {
        #[source]
        source: reqwest::Error,
    },

    #[error("wecom request failed")]
    Request {
        #[source]
        source: reqwest::Error,
    },

    #[error("media validation failed: {0}")]
    Validation(String),

    #[error("unsupported message type: {0}")]
    UnsupportedType(String),

    #[error("{msg_type} message is missing payload field `{field}`")]
    MissingField {
        msg_type: &'static str,
        field: &'static str,
    },
}

impl WecomError {
    /// 传输层失败（状态码/连接/超时/其它请求错误），请求未可靠落地。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { .. } | Self::Connection { .. } | Self::Timeout { .. } | Self::Request { .. }
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout { source: err };
        }
        if err.is_connect() {
            return Self::Connection { source: err };
        }
        if let Some(status) = err.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                source: err,
            };
        }
        Self::Request { source: err }
    }
}

pub type WecomResult<T> = Result<T, WecomError>;
