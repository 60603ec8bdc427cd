//! 实时通道的事件协议。
//!
//! 客户端与服务端之间交换的都是带 `event` 标签的 JSON 文本帧。

use domain::{ChannelId, ContentType, Message, MessageId, MessageTarget, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ErrorScope;
use crate::presence::PresenceStatus;

/// 客户端发往服务端的事件
///
/// 标识字段保持原始字符串，由路由器统一校验，这样格式错误可以作为验证错误回报给发送方。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        recipient_id: String,
        content: String,
        content_type: String,
    },
    #[serde(rename_all = "camelCase")]
    SendChannelMessage {
        channel_id: String,
        content: String,
        content_type: String,
    },
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    ReceiveMessage(MessageView),
    PresenceUpdate {
        identity: UserId,
        status: PresenceStatus,
    },
    Error {
        scope: ErrorScope,
        detail: String,
    },
}

impl ServerEvent {
    pub fn receive(message: &Message) -> Self {
        ServerEvent::ReceiveMessage(MessageView::from(message))
    }

    pub fn presence(identity: UserId, status: PresenceStatus) -> Self {
        ServerEvent::PresenceUpdate { identity, status }
    }

    pub fn error(scope: ErrorScope, detail: impl Into<String>) -> Self {
        ServerEvent::Error {
            scope,
            detail: detail.into(),
        }
    }
}

/// `receive-message` 事件携带的完整消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    pub content: String,
    pub content_type: ContentType,
    pub timestamp: Timestamp,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let (recipient_id, channel_id) = match message.target {
            MessageTarget::Direct(recipient) => (Some(recipient), None),
            MessageTarget::Channel(channel) => (None, Some(channel)),
        };

        Self {
            id: message.id,
            sender_id: message.sender_id,
            recipient_id,
            channel_id,
            content: message.payload.as_str().to_owned(),
            content_type: message.payload.content_type(),
            timestamp: message.created_at,
        }
    }
}
