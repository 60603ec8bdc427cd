use std::sync::Arc;

use domain::UserId;
use serde::{Deserialize, Serialize};

use crate::delivery::{deliver_to_set, DeliveryReport};
use crate::events::ServerEvent;
use crate::registry::{ConnectionRegistry, RegistryChange};
use crate::repository::ChannelMembership;

/// 在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    /// 注册表变化对应的在线状态，没有变化时返回 `None`
    pub fn from_change(change: RegistryChange) -> Option<Self> {
        match change {
            RegistryChange::CameOnline => Some(PresenceStatus::Online),
            RegistryChange::WentOffline => Some(PresenceStatus::Offline),
            RegistryChange::Unchanged => None,
        }
    }
}

/// 在线状态广播器
///
/// 身份上线或离线时，向其所有联系人/频道成员的每个连接推送 `presence-update`。
/// 投递是尽力而为的：单个连接失败不影响其他连接，也不重试。
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    membership: Arc<dyn ChannelMembership>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, membership: Arc<dyn ChannelMembership>) -> Self {
        Self {
            registry,
            membership,
        }
    }

    pub async fn announce(&self, user_id: UserId, status: PresenceStatus) -> DeliveryReport {
        let contacts = match self.membership.resolve_contacts(user_id).await {
            Ok(contacts) => contacts,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "解析联系人失败，跳过在线状态广播");
                return DeliveryReport::default();
            }
        };

        // 解析联系人期间状态可能又发生了变化，过期的变化交给后一次广播
        let currently_online = self.registry.is_online(user_id);
        if currently_online != (status == PresenceStatus::Online) {
            tracing::debug!(user_id = %user_id, ?status, "在线状态已被后续变化取代");
            return DeliveryReport::default();
        }

        let targets: Vec<_> = contacts
            .into_iter()
            .filter(|contact| *contact != user_id)
            .flat_map(|contact| self.registry.lookup(contact))
            .collect();

        let report = deliver_to_set(&targets, Arc::new(ServerEvent::presence(user_id, status)));

        tracing::info!(
            user_id = %user_id,
            ?status,
            delivered = report.delivered,
            failed = report.failed,
            "在线状态已广播"
        );

        report
    }
}
