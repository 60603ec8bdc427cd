#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{
    InMemoryChannelDirectory, InMemoryMessageStore, RealtimeHub, RealtimeHubDependencies,
    SystemClock,
};
use config::JwtConfig;
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use infrastructure::JwtService;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;
use web_api::{router, AppState, Heartbeat};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TEST_SECRET: &str = "web-api-test-secret-with-32-plus-characters";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// 绑定 127.0.0.1:0 的测试服务，使用内存协作方与真实的 JWT 网关
pub struct TestServer {
    pub addr: SocketAddr,
    pub jwt: JwtService,
    pub hub: Arc<RealtimeHub>,
    pub store: Arc<InMemoryMessageStore>,
    pub directory: Arc<InMemoryChannelDirectory>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with_heartbeat(Heartbeat {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        })
        .await
    }

    pub async fn spawn_with_heartbeat(heartbeat: Heartbeat) -> Self {
        let jwt = JwtService::new(&JwtConfig {
            secret: TEST_SECRET.to_string(),
            expiration_hours: 72,
        });
        let store = Arc::new(InMemoryMessageStore::default());
        let directory = Arc::new(InMemoryChannelDirectory::with_message_store(store.clone()));

        let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
            auth_gate: Arc::new(jwt.clone()),
            persistence: store.clone(),
            membership: directory.clone(),
            clock: Arc::new(SystemClock),
            persist_timeout: Duration::from_secs(5),
            outbound_buffer: 64,
        }));

        let app = router(AppState::new(hub.clone(), heartbeat));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            jwt,
            hub,
            store,
            directory,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn new_user(&self) -> (UserId, String) {
        let user_id = UserId::from(Uuid::new_v4());
        let token = self
            .jwt
            .issue_token(user_id, &format!("{user_id}@example.com"))
            .expect("issue token");
        (user_id, token)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 通过 `token` 查询参数连接
    pub async fn connect(&self, token: &str) -> WsClient {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        ws
    }

    /// 通过 Authorization 头连接
    pub async fn connect_with_bearer(&self, token: &str) -> WsClient {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .expect("request");
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header"),
        );
        let (ws, _) = connect_async(request).await.expect("websocket connect");
        ws
    }

    /// 通过 `jwt` cookie 连接
    pub async fn connect_with_cookie(&self, token: &str) -> WsClient {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .expect("request");
        request.headers_mut().insert(
            "Cookie",
            HeaderValue::from_str(&format!("jwt={token}")).expect("header"),
        );
        let (ws, _) = connect_async(request).await.expect("websocket connect");
        ws
    }

    pub async fn health(&self) -> Value {
        reqwest::get(self.http_url("/health"))
            .await
            .expect("health request")
            .json::<Value>()
            .await
            .expect("health json")
    }

    /// 轮询健康检查直到连接数达到预期
    pub async fn wait_for_connections(&self, expected: u64) {
        for _ in 0..100 {
            if self.health().await["connections"].as_u64() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("connections never reached {expected}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(TungsteniteMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个 JSON 事件，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(TungsteniteMessage::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).expect("json event");
                }
                Some(Ok(TungsteniteMessage::Close(frame))) => panic!("connection closed: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(err)) => panic!("websocket error: {err}"),
                None => panic!("stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// 读取下一个指定类型的事件，跳过其它事件
pub async fn next_event_of(ws: &mut WsClient, kind: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == kind {
            return event;
        }
    }
}

/// 断言在给定时间内没有收到指定类型的事件
pub async fn assert_no_event_of(ws: &mut WsClient, kind: &str, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let frame = match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(frame) => frame,
        };
        match frame {
            Some(Ok(TungsteniteMessage::Text(text))) => {
                let event: Value = serde_json::from_str(text.as_str()).expect("json event");
                assert_ne!(event["event"], kind, "unexpected event: {event}");
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return,
        }
    }
}
