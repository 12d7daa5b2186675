// 重试策略
//
// 无状态决策：给定已尝试次数和错误，决定带延迟重试还是放弃。
// 退避是线性的（delay = attempt_count * base_unit），不是指数的，
// 上限由最大重试次数兜底，不另设延迟上限

use crate::boxapi::StorageError;
use std::time::Duration;

/// 默认最大重试次数（即最多 4 次尝试）
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认退避基本单位
pub const DEFAULT_BASE_UNIT: Duration = Duration::from_secs(1);

/// 重试决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待指定时长后重试
    Retry(Duration),
    /// 放弃，该分片永久失败
    GiveUp,
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 最大重试次数
    max_retries: u32,
    /// 线性退避基本单位
    base_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_unit: DEFAULT_BASE_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_unit: Duration) -> Self {
        Self {
            max_retries,
            base_unit,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 决定是否重试
    ///
    /// `attempt_count` 为已完成的尝试次数（首次失败时为 1）。
    /// 非瞬时错误（认证/参数/摘要不一致）不论尝试次数直接放弃
    pub fn decide(&self, attempt_count: u32, error: &StorageError) -> RetryDecision {
        if !error.is_retriable() {
            return RetryDecision::GiveUp;
        }
        if attempt_count > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.base_unit * attempt_count)
    }
}
