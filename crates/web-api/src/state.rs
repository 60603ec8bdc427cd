use std::sync::Arc;
use std::time::Duration;

use application::RealtimeHub;
use config::DispatchConfig;

/// 服务端心跳参数
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl From<&DispatchConfig> for Heartbeat {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(hub: Arc<RealtimeHub>, heartbeat: Heartbeat) -> Self {
        Self { hub, heartbeat }
    }
}
