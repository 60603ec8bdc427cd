use std::sync::Arc;
use std::time::Duration;

use application::{ServerEvent, Session};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};

use crate::state::AppState;

/// 正常关闭
const CLOSE_NORMAL: u16 = 1000;
/// 服务端停止
const CLOSE_GOING_AWAY: u16 = 1001;
/// 心跳超时后等待写任务收尾的上限
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// WebSocket 连接管理器
///
/// 封装单个已认证连接的读写循环：
/// - 写任务独占 socket sink，转发出站队列中的事件
/// - 读循环逐个处理入站帧，等待每次分发完成后再读下一帧
/// - 服务端心跳，超时未回应的连接被关闭
/// - 结束时注销连接
pub struct WebSocketConnection {
    state: AppState,
    session: Session,
    outbound: mpsc::Receiver<Arc<ServerEvent>>,
}

impl WebSocketConnection {
    pub fn new(
        state: AppState,
        session: Session,
        outbound: mpsc::Receiver<Arc<ServerEvent>>,
    ) -> Self {
        Self {
            state,
            session,
            outbound,
        }
    }

    /// 运行 WebSocket 连接的主循环，直到客户端断开、心跳超时或服务停止
    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            mut session,
            outbound,
        } = self;
        let user_id = session.user_id();
        let connection_id = session.connection_id();
        let heartbeat = state.heartbeat;

        let (sink, mut incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(8);
        let mut send_task = tokio::spawn(write_loop(sink, outbound, cmd_rx));
        let mut writer_done = false;

        let mut ping_tick = interval_at(
            Instant::now() + heartbeat.ping_interval,
            heartbeat.ping_interval,
        );
        ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                frame = incoming.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                            break;
                        }
                        None => break,
                    };
                    match message {
                        WsMessage::Text(text) => {
                            // 错误已回报到本连接，这里只记录
                            if let Err(err) = state.hub.handle_frame(&session, text.as_str()).await {
                                tracing::debug!(connection_id = %connection_id, error = %err, "入站事件被拒绝");
                            }
                        }
                        WsMessage::Binary(data) => {
                            if let Err(err) = state.hub.handle_binary_frame(&session, &data).await {
                                tracing::debug!(connection_id = %connection_id, error = %err, "入站事件被拒绝");
                            }
                        }
                        WsMessage::Ping(data) => {
                            if cmd_tx.send(WsCommand::Pong(data.to_vec())).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {
                            pong_deadline = None;
                        }
                        WsMessage::Close(_) => {
                            tracing::info!(connection_id = %connection_id, "WebSocket 收到关闭消息");
                            break;
                        }
                    }
                }
                _ = ping_tick.tick() => {
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + heartbeat.pong_timeout);
                    }
                    if cmd_tx.send(WsCommand::Ping).await.is_err() {
                        break;
                    }
                }
                _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                    tracing::info!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        "心跳超时，关闭连接"
                    );
                    let _ = cmd_tx.send(WsCommand::Close(CLOSE_NORMAL, "heartbeat timeout")).await;
                    break;
                }
                _ = session.closed() => {
                    let _ = cmd_tx.send(WsCommand::Close(CLOSE_GOING_AWAY, "server shutting down")).await;
                    break;
                }
                _ = &mut send_task => {
                    writer_done = true;
                    break;
                }
            }
        }

        state.hub.disconnect(&session).await;

        // 释放出站队列的最后一个发送端与命令通道，写任务随之结束
        drop(session);
        drop(cmd_tx);
        if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut send_task).await.is_err() {
            send_task.abort();
        }

        tracing::info!(user_id = %user_id, connection_id = %connection_id, "WebSocket 连接已清理");
    }
}

/// 写任务：统一处理所有对 WebSocket sink 的写操作
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Arc<ServerEvent>>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
) {
    loop {
        let frame = tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                WsCommand::Ping => WsMessage::Ping(Vec::new().into()),
                WsCommand::Pong(data) => WsMessage::Pong(data.into()),
                WsCommand::Close(code, reason) => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            },
            Some(event) = outbound.recv() => match serde_json::to_string(event.as_ref()) {
                Ok(json) => WsMessage::Text(json.into()),
                Err(err) => {
                    tracing::warn!(error = %err, "事件序列化失败");
                    continue;
                }
            },
            else => break,
        };

        if sink.send(frame).await.is_err() {
            tracing::debug!("WebSocket 写入失败，写任务结束");
            break;
        }
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    Ping,
    Pong(Vec<u8>),
    Close(u16, &'static str),
}
