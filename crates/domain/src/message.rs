use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChannelId, MessageId, Timestamp, UserId};

/// 文本消息的最大长度（字符数）。
pub const MAX_TEXT_LENGTH: usize = 4096;

/// 线上协议中的内容类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::File => "file",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "text" => Ok(ContentType::Text),
            "file" => Ok(ContentType::File),
            other => Err(DomainError::validation_error(
                "contentType",
                format!("unsupported content type `{other}`"),
            )),
        }
    }
}

/// 消息正文：文本，或指向已上传文件的引用。
///
/// 文件本身由 REST 上传流程写入，这里只保存其地址。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    Text(String),
    File { url: String },
}

impl MessagePayload {
    /// 按内容类型校验并构造消息正文。
    pub fn parse(content_type: ContentType, content: impl Into<String>) -> Result<Self, DomainError> {
        let content = content.into();
        match content_type {
            ContentType::Text => {
                if content.trim().is_empty() {
                    return Err(DomainError::validation_error("content", "cannot be empty"));
                }
                if content.chars().count() > MAX_TEXT_LENGTH {
                    return Err(DomainError::validation_error(
                        "content",
                        format!("exceeds {MAX_TEXT_LENGTH} characters"),
                    ));
                }
                Ok(MessagePayload::Text(content))
            }
            ContentType::File => {
                let url = content.trim();
                if url.is_empty() {
                    return Err(DomainError::validation_error(
                        "content",
                        "file reference cannot be empty",
                    ));
                }
                Ok(MessagePayload::File {
                    url: url.to_owned(),
                })
            }
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            MessagePayload::Text(_) => ContentType::Text,
            MessagePayload::File { .. } => ContentType::File,
        }
    }

    /// 线上传输的 `content` 字段：文本本身或文件地址。
    pub fn as_str(&self) -> &str {
        match self {
            MessagePayload::Text(text) => text,
            MessagePayload::File { url } => url,
        }
    }
}

/// 消息的投递目标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    Direct(UserId),
    Channel(ChannelId),
}

/// 尚未持久化的消息草稿，交给持久化协作方分配 id 与时间戳。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub payload: MessagePayload,
}

impl NewMessage {
    pub fn new(sender_id: UserId, target: MessageTarget, payload: MessagePayload) -> Self {
        Self {
            sender_id,
            target,
            payload,
        }
    }
}

/// 已持久化的消息，之后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub payload: MessagePayload,
    pub created_at: Timestamp,
}

impl Message {
    pub fn from_draft(id: MessageId, draft: NewMessage, created_at: Timestamp) -> Self {
        Self {
            id,
            sender_id: draft.sender_id,
            target: draft.target,
            payload: draft.payload,
            created_at,
        }
    }

    /// 判断消息是否属于 `a` 与 `b` 之间的私聊（任一方向）。
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        match self.target {
            MessageTarget::Direct(recipient) => {
                (self.sender_id == a && recipient == b) || (self.sender_id == b && recipient == a)
            }
            MessageTarget::Channel(_) => false,
        }
    }
}
