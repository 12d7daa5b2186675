// 分块上传引擎
//
// 组件（自底向上）：
// - planner: 分片规划（纯函数）
// - retry: 重试策略（无状态，线性退避）
// - checksum: 顺序摘要聚合器（并发喂入，结果与串行计算一致）
// - part: 单分片上传（带重试）
// - scheduler: 有界并发调度器（Semaphore + JoinSet）
// - session: 会话控制器（Created → Uploading → {Committed | Failed}）

pub mod checksum;
pub mod part;
pub mod planner;
pub mod retry;
pub mod scheduler;
pub mod session;

pub use checksum::{ChecksumAggregator, PayloadDigest};
pub use part::{PartOutcome, PartState, PartUploader};
pub use planner::{plan, PartTask};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::{SchedulerResult, UploadScheduler};
pub use session::{SessionStatus, UploadSessionController};

use crate::boxapi::StorageError;
use thiserror::Error;

/// 上传引擎错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 分片规划参数无效
    #[error("无效的大小参数: payload_size={payload_size}, part_size={part_size}")]
    InvalidSize { payload_size: u64, part_size: u64 },

    /// 本地分片规划与服务端报告的分片数不一致（协议错误，致命）
    #[error("分片规划与服务端不一致: 本地 {planned} 片, 服务端 {reported} 片")]
    ProtocolMismatch { planned: usize, reported: u64 },

    /// 部分分片永久失败，会话无法提交
    #[error("分片上传失败, 失败分片索引: {indices:?}")]
    PartsFailed { indices: Vec<usize> },

    /// 上传被取消
    #[error("上传已取消")]
    Cancelled,

    /// 存储服务错误（会话创建 / commit 阶段）
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// 其他内部错误
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
