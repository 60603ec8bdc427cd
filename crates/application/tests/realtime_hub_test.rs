//! 实时分发中枢的行为测试
//!
//! 覆盖多设备投递、离线接收方、频道扇出、重连、顺序、认证失败与持久化失败等场景。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use application::{
    ApplicationError, ChannelMembership, ClientEvent, ErrorScope, InMemoryChannelDirectory,
    InMemoryMessageStore, MessageView, PersistenceClient, PresenceStatus, RealtimeHub,
    RealtimeHubDependencies, ServerEvent, StaticAuthGate, SystemClock,
};
use async_trait::async_trait;
use domain::{ChannelId, Message, NewMessage, RepositoryError, UserId};
use tokio::sync::mpsc;
use uuid::Uuid;

type Outbound = mpsc::Receiver<Arc<ServerEvent>>;

/// 测试辅助结构：封装中枢和内存协作方
struct TestHub {
    hub: Arc<RealtimeHub>,
    auth: Arc<StaticAuthGate>,
    store: Arc<InMemoryMessageStore>,
    directory: Arc<InMemoryChannelDirectory>,
}

impl TestHub {
    fn new() -> Self {
        let store = Arc::new(InMemoryMessageStore::default());
        Self::with_persistence(store.clone(), store)
    }

    fn with_persistence(
        store: Arc<InMemoryMessageStore>,
        persistence: Arc<dyn PersistenceClient>,
    ) -> Self {
        let auth = Arc::new(StaticAuthGate::new());
        let directory = Arc::new(InMemoryChannelDirectory::with_message_store(store.clone()));
        let membership: Arc<dyn ChannelMembership> = directory.clone();

        let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
            auth_gate: auth.clone(),
            persistence,
            membership,
            clock: Arc::new(SystemClock),
            persist_timeout: Duration::from_secs(1),
            outbound_buffer: 32,
        }));

        Self {
            hub,
            auth,
            store,
            directory,
        }
    }

    async fn connect(&self, user_id: UserId) -> (application::Session, Outbound) {
        let token = self.auth.issue(user_id);
        self.hub.connect(&token).await.expect("connect")
    }
}

fn user() -> UserId {
    UserId::from(Uuid::new_v4())
}

fn direct(to: UserId, text: &str) -> ClientEvent {
    ClientEvent::SendMessage {
        recipient_id: to.to_string(),
        content: text.to_string(),
        content_type: "text".to_string(),
    }
}

fn to_channel(channel: ChannelId, text: &str) -> ClientEvent {
    ClientEvent::SendChannelMessage {
        channel_id: channel.to_string(),
        content: text.to_string(),
        content_type: "text".to_string(),
    }
}

/// 取出队列中已有的全部事件
fn drain(rx: &mut Outbound) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((*event).clone());
    }
    events
}

fn messages(events: &[ServerEvent]) -> Vec<MessageView> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::ReceiveMessage(view) => Some(view.clone()),
            _ => None,
        })
        .collect()
}

fn presence(events: &[ServerEvent]) -> Vec<(UserId, PresenceStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::PresenceUpdate { identity, status } => Some((*identity, *status)),
            _ => None,
        })
        .collect()
}

/// 持久化总是失败的存储
struct FailingStore;

#[async_trait]
impl PersistenceClient for FailingStore {
    async fn persist_message(&self, _message: NewMessage) -> Result<Message, RepositoryError> {
        Err(RepositoryError::storage("database unavailable"))
    }

    async fn fetch_message_history(
        &self,
        _a: UserId,
        _b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn fetch_channel_history(
        &self,
        _channel_id: ChannelId,
    ) -> Result<Vec<Message>, RepositoryError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn direct_message_reaches_each_of_n_connections_exactly_once() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());

    let (alice_session, mut alice_rx) = t.connect(alice).await;
    let mut bob_devices = Vec::new();
    for _ in 0..3 {
        bob_devices.push(t.connect(bob).await);
    }

    let outcome = t
        .hub
        .handle_event(&alice_session, direct(bob, "hello bob"))
        .await
        .unwrap();
    assert_eq!(outcome.report.delivered, 3);

    for (_, rx) in &mut bob_devices {
        let received = messages(&drain(rx));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content, "hello bob");
        assert_eq!(received[0].sender_id, alice);
        assert_eq!(received[0].recipient_id, Some(bob));
        assert_eq!(received[0].id, outcome.message.id);
    }
    assert!(messages(&drain(&mut alice_rx)).is_empty());
}

#[tokio::test]
async fn offline_recipient_gets_history_not_live_delivery() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());

    let (alice_session, _alice_rx) = t.connect(alice).await;
    let outcome = t
        .hub
        .handle_event(&alice_session, direct(bob, "hi"))
        .await
        .unwrap();
    assert_eq!(outcome.report.delivered, 0);
    assert_eq!(outcome.report.failed, 0);

    // bob 之后上线：没有实时事件，但历史中能看到 "hi"
    let (_bob_session, mut bob_rx) = t.connect(bob).await;
    assert!(messages(&drain(&mut bob_rx)).is_empty());

    let history = t.store.fetch_message_history(bob, alice).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender_id, alice);
    assert_eq!(history[0].payload.as_str(), "hi");
    assert_eq!(history[0].id, outcome.message.id);
}

#[tokio::test]
async fn channel_message_reaches_other_members_once_and_never_sender() {
    let t = TestHub::new();
    let (a, b, c) = (user(), user(), user());
    let channel = ChannelId::from(Uuid::new_v4());
    t.directory.set_members(channel, [a, b, c]).await;

    let (a_session, mut a_rx) = t.connect(a).await;
    let (_b_session, mut b_rx) = t.connect(b).await;
    let (_c_session, mut c_rx) = t.connect(c).await;

    t.hub
        .handle_event(&a_session, to_channel(channel, "standup in 5"))
        .await
        .unwrap();

    for rx in [&mut b_rx, &mut c_rx] {
        let received = messages(&drain(rx));
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].channel_id, Some(channel));
        assert_eq!(received[0].recipient_id, None);
    }
    assert!(messages(&drain(&mut a_rx)).is_empty());
}

#[tokio::test]
async fn reconnect_creates_independent_entry_and_stale_connection_gets_nothing() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());
    let (alice_session, _alice_rx) = t.connect(alice).await;

    let (old_session, mut old_rx) = t.connect(bob).await;
    t.hub.disconnect(&old_session).await;
    // 重复断开是空操作
    t.hub.disconnect(&old_session).await;

    let (new_session, mut new_rx) = t.connect(bob).await;
    assert_ne!(old_session.connection_id(), new_session.connection_id());
    assert_eq!(t.hub.registry().lookup(bob).len(), 1);

    t.hub
        .handle_event(&alice_session, direct(bob, "are you back?"))
        .await
        .unwrap();

    assert_eq!(messages(&drain(&mut new_rx)).len(), 1);
    assert!(messages(&drain(&mut old_rx)).is_empty());
}

#[tokio::test]
async fn sequential_sends_arrive_in_order() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());
    let (alice_session, _alice_rx) = t.connect(alice).await;
    let (_bob_session, mut bob_rx) = t.connect(bob).await;

    for text in ["first", "second", "third"] {
        t.hub
            .handle_event(&alice_session, direct(bob, text))
            .await
            .unwrap();
    }

    let received: Vec<_> = messages(&drain(&mut bob_rx))
        .into_iter()
        .map(|view| view.content)
        .collect();
    assert_eq!(received, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn failed_handshake_is_refused_without_presence() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());
    t.directory.add_contact(alice, bob).await;

    let (_bob_session, mut bob_rx) = t.connect(bob).await;

    let err = t.hub.connect("forged-token").await.unwrap_err();
    assert!(matches!(err, ApplicationError::Authentication(_)));
    assert_eq!(err.scope(), ErrorScope::Auth);

    assert!(!t.hub.registry().is_online(alice));
    assert_eq!(t.hub.registry().connection_count(), 1);
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn channel_persistence_failure_reports_to_sender_only() {
    let store = Arc::new(InMemoryMessageStore::default());
    let t = TestHub::with_persistence(store, Arc::new(FailingStore));
    let (a, b, c) = (user(), user(), user());
    let channel = ChannelId::from(Uuid::new_v4());
    t.directory.set_members(channel, [a, b, c]).await;

    let (a_session, mut a_rx) = t.connect(a).await;
    let (_b_session, mut b_rx) = t.connect(b).await;
    let (_c_session, mut c_rx) = t.connect(c).await;
    drain(&mut a_rx);

    let err = t
        .hub
        .handle_event(&a_session, to_channel(channel, "will not persist"))
        .await
        .unwrap_err();
    assert_eq!(err.scope(), ErrorScope::Persistence);

    let sender_events = drain(&mut a_rx);
    assert!(matches!(
        sender_events.as_slice(),
        [ServerEvent::Error { scope: ErrorScope::Persistence, .. }]
    ));
    assert!(messages(&drain(&mut b_rx)).is_empty());
    assert!(messages(&drain(&mut c_rx)).is_empty());
}

#[tokio::test]
async fn malformed_frame_reports_validation_error_to_sender() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());
    let (alice_session, mut alice_rx) = t.connect(alice).await;
    let (_bob_session, mut bob_rx) = t.connect(bob).await;
    drain(&mut alice_rx);

    let err = t
        .hub
        .handle_frame(&alice_session, r#"{"event":"send-message","content":"no recipient"}"#)
        .await
        .unwrap_err();
    assert_eq!(err.scope(), ErrorScope::Validation);

    let frame = format!(
        r#"{{"event":"send-message","recipientId":"{bob}","content":"","contentType":"text"}}"#
    );
    let err = t.hub.handle_frame(&alice_session, &frame).await.unwrap_err();
    assert_eq!(err.scope(), ErrorScope::Validation);

    let sender_events = drain(&mut alice_rx);
    assert_eq!(sender_events.len(), 2);
    assert!(sender_events
        .iter()
        .all(|event| matches!(event, ServerEvent::Error { scope: ErrorScope::Validation, .. })));
    assert!(drain(&mut bob_rx).is_empty());
    assert!(t.store.is_empty().await);
}

#[tokio::test]
async fn binary_frame_with_invalid_utf8_is_rejected_not_rewritten() {
    let t = TestHub::new();
    let (alice, bob) = (user(), user());
    let (alice_session, mut alice_rx) = t.connect(alice).await;
    let (_bob_session, mut bob_rx) = t.connect(bob).await;
    drain(&mut alice_rx);

    let mut frame = format!(
        r#"{{"event":"send-message","recipientId":"{bob}","content":"pay "#
    )
    .into_bytes();
    frame.extend_from_slice(&[0xff, 0xfe]);
    frame.extend_from_slice(br#"","contentType":"text"}"#);

    let err = t
        .hub
        .handle_binary_frame(&alice_session, &frame)
        .await
        .unwrap_err();
    assert_eq!(err.scope(), ErrorScope::Validation);

    let sender_events = drain(&mut alice_rx);
    assert!(matches!(
        sender_events.as_slice(),
        [ServerEvent::Error { scope: ErrorScope::Validation, .. }]
    ));
    assert!(drain(&mut bob_rx).is_empty());
    assert!(t.store.is_empty().await);

    // 合法的 UTF-8 二进制帧按文本帧处理
    let valid = format!(
        r#"{{"event":"send-message","recipientId":"{bob}","content":"pay 5€","contentType":"text"}}"#
    );
    t.hub
        .handle_binary_frame(&alice_session, valid.as_bytes())
        .await
        .expect("valid binary frame");
    let received = messages(&drain(&mut bob_rx));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content, "pay 5€");
}

/// 每次写入前等待一段时间的存储
struct SlowStore {
    inner: Arc<InMemoryMessageStore>,
    delay: Duration,
}

#[async_trait]
impl PersistenceClient for SlowStore {
    async fn persist_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.persist_message(message).await
    }

    async fn fetch_message_history(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.inner.fetch_message_history(a, b).await
    }

    async fn fetch_channel_history(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.inner.fetch_channel_history(channel_id).await
    }
}

#[tokio::test]
async fn dropping_sender_mid_send_does_not_cancel_persistence() {
    let store = Arc::new(InMemoryMessageStore::default());
    let slow = Arc::new(SlowStore {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    });
    let t = TestHub::with_persistence(store.clone(), slow);
    let (alice, bob) = (user(), user());
    let (alice_session, _alice_rx) = t.connect(alice).await;
    let (_bob_session, mut bob_rx) = t.connect(bob).await;
    drain(&mut bob_rx);

    let hub = t.hub.clone();
    let sending = tokio::spawn(async move {
        hub.handle_event(&alice_session, direct(bob, "still delivered"))
            .await
    });

    // 连接在持久化进行中消失
    tokio::time::sleep(Duration::from_millis(50)).await;
    sending.abort();
    assert!(sending.await.unwrap_err().is_cancelled());
    assert!(store.is_empty().await);

    let delivered = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
        .await
        .expect("dispatch should finish after the caller is gone")
        .expect("outbound queue open");
    assert!(matches!(
        delivered.as_ref(),
        ServerEvent::ReceiveMessage(view) if view.content == "still delivered"
    ));

    let history = store.fetch_message_history(alice, bob).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload.as_str(), "still delivered");
}

#[tokio::test]
async fn presence_follows_first_and_last_connection() {
    let t = TestHub::new();
    let (alice, bob, stranger) = (user(), user(), user());
    t.directory.add_contact(alice, bob).await;

    let (_bob_session, mut bob_rx) = t.connect(bob).await;
    let (_stranger_session, mut stranger_rx) = t.connect(stranger).await;

    let (phone, _phone_rx) = t.connect(alice).await;
    let (laptop, _laptop_rx) = t.connect(alice).await;
    assert_eq!(presence(&drain(&mut bob_rx)), vec![(alice, PresenceStatus::Online)]);

    t.hub.disconnect(&phone).await;
    assert!(drain(&mut bob_rx).is_empty());

    t.hub.disconnect(&laptop).await;
    assert_eq!(presence(&drain(&mut bob_rx)), vec![(alice, PresenceStatus::Offline)]);

    assert!(presence(&drain(&mut stranger_rx)).is_empty());
}

#[tokio::test]
async fn shutdown_drains_registry_and_closes_sessions() {
    let t = TestHub::new();
    let (mut session, _rx) = t.connect(user()).await;
    let (_other, _other_rx) = t.connect(user()).await;

    assert_eq!(t.hub.shutdown(), 2);
    assert_eq!(t.hub.registry().online_count(), 0);

    tokio::time::timeout(Duration::from_secs(1), session.closed())
        .await
        .expect("session should observe shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_senders_each_deliver_exactly_once() {
    let t = TestHub::new();
    let bob = user();
    let (_bob_session, mut bob_rx) = t.connect(bob).await;

    let mut senders = Vec::new();
    for _ in 0..8 {
        senders.push(t.connect(user()).await);
    }
    drain(&mut bob_rx);

    let tasks: Vec<_> = senders
        .into_iter()
        .enumerate()
        .map(|(i, (session, _rx))| {
            let hub = t.hub.clone();
            tokio::spawn(async move {
                hub.handle_event(&session, direct(bob, &format!("msg-{i}")))
                    .await
                    .map(|outcome| outcome.message.id)
            })
        })
        .collect();

    let mut sent = HashSet::new();
    for result in futures::future::join_all(tasks).await {
        sent.insert(result.unwrap().unwrap());
    }

    let received: HashSet<_> = messages(&drain(&mut bob_rx))
        .into_iter()
        .map(|view| view.id)
        .collect();
    assert_eq!(sent.len(), 8);
    assert_eq!(received, sent);
}
