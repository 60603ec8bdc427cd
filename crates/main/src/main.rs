//! 主应用程序入口
//!
//! 加载配置、装配实时分发中枢并启动 Axum 服务。

use std::sync::Arc;

use application::{
    ChannelMembership, InMemoryChannelDirectory, InMemoryMessageStore, PersistenceClient,
    RealtimeHub, RealtimeHubDependencies, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, JwtService, PgChannelDirectory, PgMessageStore, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, Heartbeat};

type Collaborators = (Arc<dyn PersistenceClient>, Arc<dyn ChannelMembership>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    if config.uses_development_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，请通过 APP_JWT__SECRET 设置生产密钥");
    }

    let (persistence, membership) = build_collaborators(&config).await?;

    let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
        auth_gate: Arc::new(JwtService::new(&config.jwt)),
        persistence,
        membership,
        clock: Arc::new(SystemClock),
        persist_timeout: config.dispatch.persist_timeout(),
        outbound_buffer: config.dispatch.outbound_buffer,
    }));

    let state = AppState::new(hub.clone(), Heartbeat::from(&config.dispatch));
    let app = router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "实时消息服务启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "监听停止信号失败");
            }
            tracing::info!("收到停止信号，关闭所有实时连接");
            hub.shutdown();
        })
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 配置了数据库时使用 PostgreSQL 适配器，否则使用内存实现
async fn build_collaborators(config: &AppConfig) -> anyhow::Result<Collaborators> {
    match &config.database.url {
        Some(url) => {
            let pool = create_pg_pool(url, config.database.max_connections).await?;
            MIGRATOR.run(&pool).await?;
            tracing::info!("已连接 PostgreSQL 并完成迁移");
            let persistence: Arc<dyn PersistenceClient> = Arc::new(PgMessageStore::new(pool.clone()));
            let membership: Arc<dyn ChannelMembership> = Arc::new(PgChannelDirectory::new(pool));
            Ok((persistence, membership))
        }
        None => {
            tracing::warn!("未配置 database.url，使用内存存储，重启后数据丢失");
            let store = Arc::new(InMemoryMessageStore::default());
            let membership: Arc<dyn ChannelMembership> =
                Arc::new(InMemoryChannelDirectory::with_message_store(store.clone()));
            let persistence: Arc<dyn PersistenceClient> = store;
            Ok((persistence, membership))
        }
    }
}
