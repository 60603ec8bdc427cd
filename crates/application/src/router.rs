//! 消息路由器：校验入站事件、持久化、解析接收方并扇出投递。

use std::sync::Arc;
use std::time::Duration;

use domain::{
    ChannelId, ContentType, DomainError, Message, MessagePayload, MessageTarget, NewMessage, UserId,
};

use crate::delivery::{deliver_to_set, DeliveryReport};
use crate::error::ApplicationError;
use crate::events::{ClientEvent, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::repository::{ChannelMembership, PersistenceClient};

pub struct MessageRouterDependencies {
    pub registry: Arc<ConnectionRegistry>,
    pub persistence: Arc<dyn PersistenceClient>,
    pub membership: Arc<dyn ChannelMembership>,
    pub persist_timeout: Duration,
}

/// 一次成功分发的结果：持久化后的消息与投递统计
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub message: Message,
    pub report: DeliveryReport,
}

pub struct MessageRouter {
    deps: MessageRouterDependencies,
}

impl MessageRouter {
    pub fn new(deps: MessageRouterDependencies) -> Self {
        Self { deps }
    }

    /// 校验客户端事件并路由到对应的发送入口
    pub async fn route(
        &self,
        sender: UserId,
        event: ClientEvent,
    ) -> Result<DispatchOutcome, ApplicationError> {
        match event {
            ClientEvent::SendMessage {
                recipient_id,
                content,
                content_type,
            } => {
                let recipient = UserId::parse(&recipient_id)?;
                let payload = MessagePayload::parse(ContentType::parse(&content_type)?, content)?;
                self.send_direct(sender, recipient, payload).await
            }
            ClientEvent::SendChannelMessage {
                channel_id,
                content,
                content_type,
            } => {
                let channel = ChannelId::parse(&channel_id)?;
                let payload = MessagePayload::parse(ContentType::parse(&content_type)?, content)?;
                self.send_channel(sender, channel, payload).await
            }
        }
    }

    /// 私聊：持久化成功后投递给接收方的每个连接，不回显给发送方
    pub async fn send_direct(
        &self,
        sender: UserId,
        recipient: UserId,
        payload: MessagePayload,
    ) -> Result<DispatchOutcome, ApplicationError> {
        if sender == recipient {
            return Err(DomainError::validation_error(
                "recipientId",
                "cannot send a direct message to yourself",
            )
            .into());
        }

        let message = self
            .persist(NewMessage::new(sender, MessageTarget::Direct(recipient), payload))
            .await?;

        let connections = self.deps.registry.lookup(recipient);
        if connections.is_empty() {
            tracing::debug!(
                message_id = %message.id,
                recipient = %recipient,
                "接收方离线，消息仅保留在历史中"
            );
        }

        let report = deliver_to_set(&connections, Arc::new(ServerEvent::receive(&message)));

        tracing::info!(
            message_id = %message.id,
            sender = %sender,
            recipient = %recipient,
            delivered = report.delivered,
            failed = report.failed,
            "私聊消息已分发"
        );

        Ok(DispatchOutcome { message, report })
    }

    /// 频道消息：持久化后按当次解析的成员列表投递给除发送方以外的所有在线成员
    pub async fn send_channel(
        &self,
        sender: UserId,
        channel: ChannelId,
        payload: MessagePayload,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let message = self
            .persist(NewMessage::new(sender, MessageTarget::Channel(channel), payload))
            .await?;

        let members = match self.deps.membership.resolve_channel_members(channel).await {
            Ok(members) => members,
            Err(err) => {
                // 消息已持久化，可通过历史取回；扇出失败不回报给发送方
                tracing::error!(
                    message_id = %message.id,
                    channel_id = %channel,
                    error = %err,
                    "解析频道成员失败，跳过扇出"
                );
                return Ok(DispatchOutcome {
                    message,
                    report: DeliveryReport::default(),
                });
            }
        };

        let connections: Vec<_> = members
            .into_iter()
            .filter(|member| *member != sender)
            .flat_map(|member| self.deps.registry.lookup(member))
            .collect();

        let report = deliver_to_set(&connections, Arc::new(ServerEvent::receive(&message)));

        tracing::info!(
            message_id = %message.id,
            sender = %sender,
            channel_id = %channel,
            delivered = report.delivered,
            failed = report.failed,
            "频道消息已分发"
        );

        Ok(DispatchOutcome { message, report })
    }

    async fn persist(&self, draft: NewMessage) -> Result<Message, ApplicationError> {
        let timeout = self.deps.persist_timeout;
        match tokio::time::timeout(timeout, self.deps.persistence.persist_message(draft)).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "消息持久化失败");
                Err(err.into())
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "消息持久化超时");
                Err(ApplicationError::persistence(format!(
                    "persistence timed out after {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}
