//! 通知服务错误类型
//!
//! 定义服务层的业务错误、系统错误，以及扇出管道按阶段划分的失败类型

use herald_shared::error::HeraldError;
use herald_shared::events::EventDecodeError;
use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

/// 通知服务错误类型
#[derive(Debug, Error)]
pub enum NotificationError {
    // === 业务错误 ===
    #[error("{entity} 不存在: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("订阅已存在: subscriber_id={subscriber_id}, target_id={target_id}")]
    AlreadySubscribed { subscriber_id: Uuid, target_id: Uuid },

    #[error("无效的用户: {0}")]
    InvalidActor(String),

    #[error("无权操作该通知: notification_id={notification_id}")]
    PermissionDenied { notification_id: Uuid },

    #[error("无效的分页游标: {0}")]
    InvalidCursor(String),

    #[error("参数校验失败: {0}")]
    InvalidArgument(String),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] HeraldError),
}

/// 通知服务 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// 是否为基础设施错误（与请求内容无关，换个时间可能成功）
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Cache(_)
                | Self::Serialization(_)
                | Self::Shared(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadySubscribed { .. } => "ALREADY_SUBSCRIBED",
            Self::InvalidActor(_) => "INVALID_ACTOR",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::InvalidCursor(_) => "INVALID_CURSOR",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
        }
    }
}

/// 业务错误到 gRPC 状态码的映射
///
/// 基础设施错误统一返回 INTERNAL，不向调用方暴露内部细节以外的分类。
impl From<NotificationError> for Status {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound { .. } => Status::not_found(err.to_string()),
            NotificationError::AlreadySubscribed { .. } => Status::already_exists(err.to_string()),
            NotificationError::InvalidActor(_)
            | NotificationError::InvalidCursor(_)
            | NotificationError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            NotificationError::PermissionDenied { .. } => {
                Status::permission_denied(err.to_string())
            }
            NotificationError::Database(_)
            | NotificationError::Cache(_)
            | NotificationError::Serialization(_)
            | NotificationError::Shared(_) => Status::internal(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// FanoutError: 扇出失败阶段
// ---------------------------------------------------------------------------

/// 扇出管道单条事件的失败
///
/// 三个阶段的失败对该事件都是终局的：事件被永久拒绝，不会重新投递。
#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("事件解码失败: {0}")]
    Decode(#[from] EventDecodeError),

    #[error("受众解析失败: actor_id={actor_id}: {source}")]
    Resolve {
        actor_id: Uuid,
        #[source]
        source: NotificationError,
    },

    #[error("通知持久化失败: actor_id={actor_id}: {source}")]
    Persist {
        actor_id: Uuid,
        #[source]
        source: NotificationError,
    },
}

impl FanoutError {
    /// 失败阶段，用作日志字段和指标标签
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Resolve { .. } => "resolve",
            Self::Persist { .. } => "persist",
        }
    }
}
