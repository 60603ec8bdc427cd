//! 统一配置中心
//!
//! 提供实时分发服务的全局配置管理，包括：
//! - 监听地址
//! - JWT认证
//! - 消息分发（持久化超时、出站队列、心跳）
//! - 可选的数据库连接
//!
//! 加载顺序：默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> 环境变量（`APP_*`，`__` 分隔层级）。

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 开发环境默认 JWT 密钥，仅用于本地调试
pub const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 消息分发配置
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 消息分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// 持久化调用超时（毫秒），超时视为持久化失败
    pub persist_timeout_ms: u64,
    /// 每个连接的出站队列容量，队列满时该连接的投递被跳过
    pub outbound_buffer: usize,
    /// 服务端 ping 间隔（秒）
    pub ping_interval_secs: u64,
    /// 等待 pong 的超时（秒）
    pub pong_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            persist_timeout_ms: 5_000,
            outbound_buffer: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl DispatchConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// 数据库配置
///
/// 未配置 `url` 时服务使用内存实现的协作方。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                // 与登录流程一致：令牌有效期三天
                expiration_hours: 72,
            },
            dispatch: DispatchConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按 默认值 -> 配置文件 -> 环境变量 的优先级加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment = figment.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                figment = figment.merge(Json::file(path));
            } else {
                figment = figment.merge(Toml::file(path));
            }
        }

        Self::from_figment(figment.merge(Env::prefixed("APP_").split("__")))
    }

    /// 从给定的 figment 提取配置，便于测试注入
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(Box::new(err)))?;
        config.validate()?;
        Ok(config)
    }

    /// 是否仍在使用开发环境密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "host cannot be empty".to_string(),
            ));
        }

        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be positive".to_string(),
            ));
        }

        if self.dispatch.persist_timeout_ms == 0 {
            return Err(ConfigError::InvalidDispatchConfig(
                "persist_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.outbound_buffer == 0 {
            return Err(ConfigError::InvalidDispatchConfig(
                "outbound_buffer must be at least 1".to_string(),
            ));
        }

        if self.dispatch.ping_interval_secs == 0 || self.dispatch.pong_timeout_secs == 0 {
            return Err(ConfigError::InvalidDispatchConfig(
                "heartbeat intervals must be greater than 0".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "database url cannot be blank".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max_connections must be greater than 0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid dispatch configuration: {0}")]
    InvalidDispatchConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
}
