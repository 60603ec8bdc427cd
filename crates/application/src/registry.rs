//! 连接注册表：身份到其活跃连接集合的并发多重映射。
//!
//! 以身份为键的分片并发表保证同一身份的注册/注销互斥，不同身份之间互不阻塞。
//! 身份的连接集合变空时整个条目被移除，不保留空条目。

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::{ConnectionId, Timestamp, UserId};
use tokio::sync::mpsc;

use crate::events::ServerEvent;

/// 单个连接上的投递失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection is closed")]
    Closed,
}

/// 一个活跃传输会话的句柄
///
/// 克隆句柄共享同一个出站队列；写任务持有队列的接收端。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    connected_at: Timestamp,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
}

impl ConnectionHandle {
    /// 创建绑定到 `user_id` 的新连接，返回句柄和出站队列的接收端
    pub fn open(
        user_id: UserId,
        connected_at: Timestamp,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::generate(),
            user_id,
            connected_at,
            outbound,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connected_at(&self) -> Timestamp {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// 非阻塞地把事件放入出站队列
    pub fn try_deliver(&self, event: Arc<ServerEvent>) -> Result<(), DeliveryFailure> {
        self.outbound.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// 注册/注销引起的在线状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    /// 身份的第一个连接：离线 -> 在线
    CameOnline,
    /// 身份的最后一个连接被移除：在线 -> 离线
    WentOffline,
    /// 身份的在线状态没有变化
    Unchanged,
}

/// 连接注册表
///
/// 在服务启动时创建、停止时通过 [`ConnectionRegistry::drain`] 清空，显式传给路由器使用。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<UserId, Vec<ConnectionHandle>>,
    index: DashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把连接登记到其绑定的身份下，对同一连接重复调用是幂等的
    pub fn register(&self, connection: ConnectionHandle) -> RegistryChange {
        let user_id = connection.user_id();
        let connection_id = connection.id();

        // 持有该身份条目的分片锁直到索引写入完成
        let mut entry = self.entries.entry(user_id).or_default();
        if entry.iter().any(|existing| existing.id() == connection_id) {
            return RegistryChange::Unchanged;
        }

        let first = entry.is_empty();
        entry.push(connection);
        self.index.insert(connection_id, user_id);
        drop(entry);

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            first,
            "连接已注册"
        );

        if first {
            RegistryChange::CameOnline
        } else {
            RegistryChange::Unchanged
        }
    }

    /// 移除连接；对未知或已移除的连接是空操作
    ///
    /// 返回连接原先所属的身份以及状态变化。
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(UserId, RegistryChange)> {
        let (_, user_id) = self.index.remove(&connection_id)?;

        let change = match self.entries.entry(user_id) {
            Entry::Occupied(mut occupied) => {
                occupied
                    .get_mut()
                    .retain(|existing| existing.id() != connection_id);
                if occupied.get().is_empty() {
                    occupied.remove();
                    RegistryChange::WentOffline
                } else {
                    RegistryChange::Unchanged
                }
            }
            Entry::Vacant(_) => RegistryChange::Unchanged,
        };

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            ?change,
            "连接已注销"
        );

        Some((user_id, change))
    }

    /// 返回身份当前连接集合的快照
    pub fn lookup(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.entries
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    pub fn online_identities(&self) -> Vec<UserId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.entries.len()
    }

    pub fn connection_count(&self) -> usize {
        self.index.len()
    }

    /// 服务停止时驱逐所有连接，返回被驱逐的句柄
    pub fn drain(&self) -> Vec<ConnectionHandle> {
        let identities = self.online_identities();
        let mut drained = Vec::new();

        for user_id in identities {
            if let Some((_, connections)) = self.entries.remove(&user_id) {
                for connection in &connections {
                    self.index.remove(&connection.id());
                }
                drained.extend(connections);
            }
        }

        drained
    }
}
