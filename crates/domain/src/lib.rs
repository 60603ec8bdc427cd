//! 聊天后端实时分发层的领域模型
//!
//! 包含用户、频道、连接等标识类型，以及消息模型和相关的校验规则。

pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use value_objects::*;
