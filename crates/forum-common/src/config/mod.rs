//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, DatabaseConfig, DrainConfig, Environment, FilterConfig,
    RedisConfig, SnowflakeConfig, TimeoutConfig,
};
