//! 实时分发中枢
//!
//! 持有连接注册表，串联认证网关、在线状态广播器与消息路由器，
//! 为传输层提供 握手 -> 事件处理 -> 断开 的完整生命周期。传输层只需要：
//! - 用凭证调用 [`RealtimeHub::connect`]，把返回的出站队列接到写任务上
//! - 把每个入站帧交给 [`RealtimeHub::handle_frame`] 或 [`RealtimeHub::handle_binary_frame`]
//! - 连接结束时调用 [`RealtimeHub::disconnect`]

use std::sync::Arc;
use std::time::Duration;

use domain::{ConnectionId, UserId};
use tokio::sync::{mpsc, watch};

use crate::auth::AuthGate;
use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::events::{ClientEvent, ServerEvent};
use crate::presence::{PresenceBroadcaster, PresenceStatus};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::repository::{ChannelMembership, PersistenceClient};
use crate::router::{DispatchOutcome, MessageRouter, MessageRouterDependencies};

pub struct RealtimeHubDependencies {
    pub auth_gate: Arc<dyn AuthGate>,
    pub persistence: Arc<dyn PersistenceClient>,
    pub membership: Arc<dyn ChannelMembership>,
    pub clock: Arc<dyn Clock>,
    pub persist_timeout: Duration,
    pub outbound_buffer: usize,
}

/// 一个已认证连接的会话
#[derive(Debug)]
pub struct Session {
    connection: ConnectionHandle,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.connection.user_id()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// 服务停止时完成
    pub async fn closed(&mut self) {
        while !*self.shutdown.borrow() {
            if self.shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// 只向本连接报告错误；连接已消失时静默丢弃
    fn report_error(&self, error: &ApplicationError) {
        let event = Arc::new(ServerEvent::error(error.scope(), error.to_string()));
        if let Err(failure) = self.connection.try_deliver(event) {
            tracing::debug!(
                connection_id = %self.connection.id(),
                error = %failure,
                "错误回报被丢弃"
            );
        }
    }
}

pub struct RealtimeHub {
    auth_gate: Arc<dyn AuthGate>,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    router: Arc<MessageRouter>,
    clock: Arc<dyn Clock>,
    outbound_buffer: usize,
    shutdown: watch::Sender<bool>,
}

impl RealtimeHub {
    pub fn new(deps: RealtimeHubDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = PresenceBroadcaster::new(registry.clone(), deps.membership.clone());
        let router = Arc::new(MessageRouter::new(MessageRouterDependencies {
            registry: registry.clone(),
            persistence: deps.persistence,
            membership: deps.membership,
            persist_timeout: deps.persist_timeout,
        }));
        let (shutdown, _) = watch::channel(false);

        Self {
            auth_gate: deps.auth_gate,
            registry,
            presence,
            router,
            clock: deps.clock,
            outbound_buffer: deps.outbound_buffer,
            shutdown,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 握手：认证凭证、登记连接，首个连接时广播上线
    ///
    /// 认证失败时不会修改注册表，也不会产生任何在线状态事件。
    pub async fn connect(
        &self,
        credential: &str,
    ) -> Result<(Session, mpsc::Receiver<Arc<ServerEvent>>), ApplicationError> {
        let user_id = self.auth_gate.authenticate(credential).await.map_err(|err| {
            tracing::info!(error = %err, "握手认证失败，拒绝连接");
            err
        })?;

        let (connection, outbound) =
            ConnectionHandle::open(user_id, self.clock.now(), self.outbound_buffer);
        let change = self.registry.register(connection.clone());

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection.id(),
            "实时连接已建立"
        );

        if let Some(status) = PresenceStatus::from_change(change) {
            self.presence.announce(user_id, status).await;
        }

        let session = Session {
            connection,
            shutdown: self.shutdown.subscribe(),
        };
        Ok((session, outbound))
    }

    /// 解析一个入站文本帧并处理；无法解析的帧作为验证错误回报给发送方
    pub async fn handle_frame(
        &self,
        session: &Session,
        frame: &str,
    ) -> Result<DispatchOutcome, ApplicationError> {
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle_event(session, event).await,
            Err(err) => {
                let error = ApplicationError::Validation(domain::DomainError::validation_error(
                    "event",
                    format!("malformed event: {err}"),
                ));
                session.report_error(&error);
                Err(error)
            }
        }
    }

    /// 二进制帧必须是合法的 UTF-8 JSON；非法字节作为验证错误回报，不做替换
    pub async fn handle_binary_frame(
        &self,
        session: &Session,
        frame: &[u8],
    ) -> Result<DispatchOutcome, ApplicationError> {
        match std::str::from_utf8(frame) {
            Ok(text) => self.handle_frame(session, text).await,
            Err(err) => {
                let error = ApplicationError::Validation(domain::DomainError::validation_error(
                    "event",
                    format!("frame is not valid UTF-8: {err}"),
                ));
                session.report_error(&error);
                Err(error)
            }
        }
    }

    /// 处理一个客户端事件
    ///
    /// 分发在独立任务中执行并被等待：同一连接上的事件按到达顺序处理，
    /// 而连接中途断开不会取消进行中的持久化。
    pub async fn handle_event(
        &self,
        session: &Session,
        event: ClientEvent,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let router = self.router.clone();
        let sender = session.user_id();

        let result = match tokio::spawn(async move { router.route(sender, event).await }).await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(user_id = %sender, error = %join_err, "分发任务异常终止");
                Err(ApplicationError::persistence("dispatch task aborted"))
            }
        };

        if let Err(error) = &result {
            tracing::debug!(
                user_id = %sender,
                connection_id = %session.connection_id(),
                scope = ?error.scope(),
                error = %error,
                "事件处理失败"
            );
            session.report_error(error);
        }

        result
    }

    /// 断开：注销连接，最后一个连接离开时广播离线；重复调用是空操作
    pub async fn disconnect(&self, session: &Session) {
        let lifetime = self.clock.now() - session.connection.connected_at();
        tracing::debug!(
            connection_id = %session.connection_id(),
            lifetime_secs = lifetime.num_seconds(),
            "会话结束"
        );
        self.release(session.connection_id()).await;
    }

    /// 按连接 ID 注销，用于会话对象已不可用的场合（例如升级失败）
    pub async fn release(&self, connection_id: ConnectionId) {
        let Some((user_id, change)) = self.registry.unregister(connection_id) else {
            return;
        };

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            "实时连接已断开"
        );

        if let Some(status) = PresenceStatus::from_change(change) {
            self.presence.announce(user_id, status).await;
        }
    }

    /// 服务停止：通知所有会话并清空注册表，返回被驱逐的连接数
    pub fn shutdown(&self) -> usize {
        self.shutdown.send_replace(true);
        let drained = self.registry.drain();
        tracing::info!(connections = drained.len(), "连接注册表已清空");
        drained.len()
    }
}
