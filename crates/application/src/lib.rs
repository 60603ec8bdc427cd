//! 应用层实现。
//!
//! 实时消息分发核心：连接注册表、认证网关抽象、在线状态广播、
//! 消息路由与扇出，以及对外部协作方（持久化、频道成员关系）的抽象。

pub mod auth;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod events;
pub mod hub;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod router;

pub use auth::{AuthError, AuthGate};
pub use clock::{Clock, SystemClock};
pub use delivery::{deliver_to_set, DeliveryReport};
pub use error::{ApplicationError, ErrorScope};
pub use events::{ClientEvent, MessageView, ServerEvent};
pub use hub::{RealtimeHub, RealtimeHubDependencies, Session};
pub use memory::{InMemoryChannelDirectory, InMemoryMessageStore, StaticAuthGate};
pub use presence::{PresenceBroadcaster, PresenceStatus};
pub use registry::{ConnectionHandle, ConnectionRegistry, DeliveryFailure, RegistryChange};
pub use repository::{ChannelMembership, PersistenceClient};
pub use router::{DispatchOutcome, MessageRouter, MessageRouterDependencies};
