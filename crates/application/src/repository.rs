use std::collections::HashSet;

use async_trait::async_trait;
use domain::{ChannelId, Message, NewMessage, RepositoryError, UserId};

/// 持久化协作方：持久保存消息并提供历史读取
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    // 持久化消息并返回带服务端 id 与时间戳的完整消息
    async fn persist_message(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    // 两个用户之间的私聊历史（双向），按时间升序
    async fn fetch_message_history(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError>;

    // 频道历史，按时间升序
    async fn fetch_channel_history(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

/// 成员关系协作方：解析频道成员与联系人
#[async_trait]
pub trait ChannelMembership: Send + Sync {
    async fn resolve_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<HashSet<UserId>, RepositoryError>;

    // 与该用户有过私聊或同在某个频道的所有身份
    async fn resolve_contacts(&self, user_id: UserId) -> Result<HashSet<UserId>, RepositoryError>;
}
