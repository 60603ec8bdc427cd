//! 内存实现的协作方（用于测试和未配置数据库的本地运行）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelId, Message, MessageId, MessageTarget, NewMessage, RepositoryError, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{AuthError, AuthGate};
use crate::clock::{Clock, SystemClock};
use crate::repository::{ChannelMembership, PersistenceClient};

/// 内存消息存储，按写入顺序保存
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryMessageStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// 与该用户有过私聊往来的所有身份
    pub async fn direct_counterparts(&self, user_id: UserId) -> HashSet<UserId> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter_map(|message| match message.target {
                MessageTarget::Direct(recipient) if message.sender_id == user_id => Some(recipient),
                MessageTarget::Direct(recipient) if recipient == user_id => Some(message.sender_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PersistenceClient for InMemoryMessageStore {
    async fn persist_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let stored = Message::from_draft(MessageId::from(Uuid::new_v4()), message, self.clock.now());
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_message_history(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut history: Vec<Message> = messages
            .iter()
            .filter(|message| message.is_between(a, b))
            .cloned()
            .collect();
        // 稳定排序，同一时间戳保持写入顺序
        history.sort_by_key(|message| message.created_at);
        Ok(history)
    }

    async fn fetch_channel_history(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut history: Vec<Message> = messages
            .iter()
            .filter(|message| message.target == MessageTarget::Channel(channel_id))
            .cloned()
            .collect();
        history.sort_by_key(|message| message.created_at);
        Ok(history)
    }
}

/// 内存频道目录
///
/// 联系人由显式登记的联系人、同频道成员，以及（可选）消息存储中的私聊往来组成。
#[derive(Default)]
pub struct InMemoryChannelDirectory {
    channels: RwLock<HashMap<ChannelId, HashSet<UserId>>>,
    contacts: RwLock<HashMap<UserId, HashSet<UserId>>>,
    message_store: Option<Arc<InMemoryMessageStore>>,
}

impl InMemoryChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从消息存储中推导私聊联系人
    pub fn with_message_store(message_store: Arc<InMemoryMessageStore>) -> Self {
        Self {
            message_store: Some(message_store),
            ..Self::default()
        }
    }

    pub async fn set_members(&self, channel_id: ChannelId, members: impl IntoIterator<Item = UserId>) {
        self.channels
            .write()
            .await
            .insert(channel_id, members.into_iter().collect());
    }

    pub async fn add_member(&self, channel_id: ChannelId, user_id: UserId) {
        self.channels
            .write()
            .await
            .entry(channel_id)
            .or_default()
            .insert(user_id);
    }

    pub async fn remove_member(&self, channel_id: ChannelId, user_id: UserId) {
        let mut channels = self.channels.write().await;
        if let Some(members) = channels.get_mut(&channel_id) {
            members.remove(&user_id);
        }
    }

    /// 登记双向联系人
    pub async fn add_contact(&self, a: UserId, b: UserId) {
        let mut contacts = self.contacts.write().await;
        contacts.entry(a).or_default().insert(b);
        contacts.entry(b).or_default().insert(a);
    }
}

#[async_trait]
impl ChannelMembership for InMemoryChannelDirectory {
    async fn resolve_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<HashSet<UserId>, RepositoryError> {
        let channels = self.channels.read().await;
        channels
            .get(&channel_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn resolve_contacts(&self, user_id: UserId) -> Result<HashSet<UserId>, RepositoryError> {
        let mut resolved: HashSet<UserId> = self
            .contacts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default();

        {
            let channels = self.channels.read().await;
            for members in channels.values().filter(|members| members.contains(&user_id)) {
                resolved.extend(members.iter().copied());
            }
        }

        if let Some(store) = &self.message_store {
            resolved.extend(store.direct_counterparts(user_id).await);
        }

        resolved.remove(&user_id);
        Ok(resolved)
    }
}

/// 固定令牌表的认证网关，用于测试和本地工具
#[derive(Default)]
pub struct StaticAuthGate {
    tokens: std::sync::RwLock<HashMap<String, UserId>>,
}

impl StaticAuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为用户签发一个随机令牌
    pub fn issue(&self, user_id: UserId) -> String {
        let token = Uuid::new_v4().simple().to_string();
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.clone(), user_id);
        }
        token
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.remove(token);
        }
    }
}

#[async_trait]
impl AuthGate for StaticAuthGate {
    async fn authenticate(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.trim().is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let tokens = self
            .tokens
            .read()
            .map_err(|_| AuthError::invalid("token table unavailable"))?;
        tokens
            .get(credential)
            .copied()
            .ok_or_else(|| AuthError::invalid("unknown token"))
    }
}
