// 应用配置
//
// 从可选的 config/app.toml 加载，缺失的字段取默认值。
// 并发数没有全局可变状态：配置/命令行的值作为参数一路传到调度器

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// 从配置文件加载；文件不存在或解析失败时使用默认配置
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("配置文件解析失败: {:?}, 错误: {}, 使用默认配置", path, e);
                    AppConfig::default()
                }
            },
            Err(_) => AppConfig::default(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 默认并发 worker 数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 单分片最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 线性退避基本单位（秒）
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// HTTP 请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_secs() -> u64 {
    1
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl UploadConfig {
    pub fn retry_base_unit(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
