// Box API 类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 分块上传会话
///
/// 由服务端创建，`id` / `part_size` / `total_parts` 创建后只读，
/// 可以在多个 worker 之间自由共享，无需同步
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话 ID（服务端分配的不透明句柄）
    pub id: String,
    /// 单个分片大小（字节，会话生命周期内固定）
    pub part_size: u64,
    /// 总分片数（服务端根据文件大小计算）
    pub total_parts: u64,
}

/// 已上传分片的服务端记录
///
/// commit 时需要完整的分片列表（按 offset 升序）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedPart {
    /// 分片 ID
    pub part_id: String,
    /// 分片起始偏移
    pub offset: u64,
    /// 分片大小
    pub size: u64,
    /// 分片 SHA-1（base64）
    pub sha1: String,
}

/// commit 成功后的最终文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedFile {
    /// 文件 ID
    pub id: String,
    /// 文件名
    pub name: String,
    /// 文件大小
    #[serde(default)]
    pub size: u64,
}

/// 上传目标：文件夹（新文件）或已有文件（新版本）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDestination {
    /// 上传到指定文件夹
    Folder(String),
    /// 覆盖已有文件（上传新版本）
    ExistingFile(String),
}

/// 存储服务错误分类
///
/// 可重试（瞬时）错误与永久错误的区分决定了 RetryPolicy 的行为
#[derive(Debug, Error)]
pub enum StorageError {
    /// 网络错误（可重试）
    #[error("网络错误: {0}")]
    Network(String),

    /// 请求超时（可重试）
    #[error("请求超时: {0}")]
    Timeout(String),

    /// 服务端错误（可重试）
    #[error("服务端错误 (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// 限流（可重试，需要更长等待时间）
    #[error("请求被限流 (HTTP 429)")]
    RateLimited,

    /// 认证失败（不可重试）
    #[error("认证失败: {0}")]
    Auth(String),

    /// 文件夹不存在（不可重试）
    #[error("文件夹不存在: {0}")]
    FolderNotFound(String),

    /// 文件不存在（不可重试）
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    /// 参数错误（不可重试）
    #[error("参数错误: {0}")]
    BadRequest(String),

    /// commit 时摘要不一致（不可重试，致命）
    #[error("摘要校验失败: 服务端拒绝了提交的 SHA-1")]
    DigestMismatch,

    /// 本地读取负载数据失败（不可重试）
    #[error("读取负载数据失败: {0}")]
    PayloadRead(String),
}

impl StorageError {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StorageError::Network(_)
                | StorageError::Timeout(_)
                | StorageError::Service { .. }
                | StorageError::RateLimited
        )
    }

    /// 从 HTTP 状态码转换（上传/会话接口通用映射）
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => StorageError::Auth(message),
            404 => StorageError::FileNotFound(message),
            // 422 是分片摘要被拒，重传同样的字节不会变好
            400 | 409 | 412 | 422 => StorageError::BadRequest(message),
            429 => StorageError::RateLimited,
            _ => StorageError::Service { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(StorageError::Network("reset".into()).is_retriable());
        assert!(StorageError::Timeout("60s".into()).is_retriable());
        assert!(StorageError::RateLimited.is_retriable());
        assert!(StorageError::Service {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retriable());

        assert!(!StorageError::Auth("expired".into()).is_retriable());
        assert!(!StorageError::FolderNotFound("123".into()).is_retriable());
        assert!(!StorageError::FileNotFound("456".into()).is_retriable());
        assert!(!StorageError::BadRequest("part size".into()).is_retriable());
        assert!(!StorageError::DigestMismatch.is_retriable());
        assert!(!StorageError::PayloadRead("io".into()).is_retriable());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            StorageError::from_status(401, String::new()),
            StorageError::Auth(_)
        ));
        assert!(matches!(
            StorageError::from_status(404, String::new()),
            StorageError::FileNotFound(_)
        ));
        assert!(matches!(
            StorageError::from_status(429, String::new()),
            StorageError::RateLimited
        ));
        assert!(matches!(
            StorageError::from_status(503, String::new()),
            StorageError::Service { status: 503, .. }
        ));
    }

    #[test]
    fn test_part_digest_rejection_is_permanent() {
        // 分片摘要被拒（HTTP 422）是永久错误, 不能带着同样的字节重试
        let err = StorageError::from_status(422, "digest mismatch".into());
        assert!(matches!(err, StorageError::BadRequest(_)));
        assert!(!err.is_retriable());
    }
}
