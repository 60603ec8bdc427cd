use std::sync::Arc;

use crate::events::ServerEvent;
use crate::registry::ConnectionHandle;

/// 一次扇出的投递结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 把同一个事件独立地投递给一组连接
///
/// 消息扇出与在线状态扇出共用这一原语。每个连接只做非阻塞入队，
/// 某个连接队列已满或已关闭时记录日志并跳过，不影响其他连接，也不重试。
pub fn deliver_to_set<'a, I>(connections: I, event: Arc<ServerEvent>) -> DeliveryReport
where
    I: IntoIterator<Item = &'a ConnectionHandle>,
{
    let mut report = DeliveryReport::default();

    for connection in connections {
        match connection.try_deliver(event.clone()) {
            Ok(()) => report.delivered += 1,
            Err(failure) => {
                report.failed += 1;
                tracing::warn!(
                    user_id = %connection.user_id(),
                    connection_id = %connection.id(),
                    error = %failure,
                    "事件投递失败，已跳过该连接"
                );
            }
        }
    }

    report
}
