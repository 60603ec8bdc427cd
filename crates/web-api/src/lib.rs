//! Web API 层。
//!
//! 提供 Axum 路由：健康检查与 WebSocket 实时通道，连接生命周期委托给应用层的实时分发中枢。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::{AppState, Heartbeat};
