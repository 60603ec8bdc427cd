//! 基础设施层实现。
//!
//! 提供 JWT 认证网关与 PostgreSQL 适配器，实现应用层定义的协作方接口。

pub mod auth;
pub mod migrations;
pub mod repository;

pub use auth::{Claims, JwtService, TokenError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgChannelDirectory, PgMessageStore};
