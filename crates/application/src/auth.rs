use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 握手阶段的认证错误，连接会被拒绝且不产生任何注册
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("credential expired")]
    Expired,
    #[error("invalid credential: {0}")]
    Invalid(String),
}

impl AuthError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        AuthError::Invalid(reason.into())
    }
}

/// 认证网关：校验连接时出示的会话凭证并返回绑定的身份
///
/// 与 REST 登录流程共用同一种带签名、有时效的会话令牌。
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthError>;
}
