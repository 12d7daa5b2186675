// 单分片上传
//
// 一个 worker 一次处理一个分片：读数据、调存储服务、失败时按
// RetryPolicy 退避重试。退避只阻塞当前 worker，不影响调度器。
// 任何失败都转成 PartOutcome 返回，绝不向上抛异常——永久失败
// 由会话控制器统一裁决

use crate::boxapi::{StorageError, StorageService, UploadSession, UploadedPart};
use crate::payload::PayloadSource;
use crate::uploader::checksum::ChecksumAggregator;
use crate::uploader::planner::PartTask;
use crate::uploader::retry::{RetryDecision, RetryPolicy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 分片终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// 上传成功
    Succeeded,
    /// 永久失败（重试预算耗尽或不可重试错误）
    Failed,
}

/// 分片上传结果
///
/// 保留到会话结束，用于诊断和 commit 的分片列表
#[derive(Debug)]
pub struct PartOutcome {
    /// 分片索引
    pub index: usize,
    /// 终态
    pub state: PartState,
    /// 实际尝试次数
    pub attempts: u32,
    /// 服务端分片记录（成功时）
    pub uploaded: Option<UploadedPart>,
    /// 最后一次失败原因（失败时）
    pub error: Option<String>,
}

impl PartOutcome {
    fn succeeded(index: usize, attempts: u32, uploaded: UploadedPart) -> Self {
        Self {
            index,
            state: PartState::Succeeded,
            attempts,
            uploaded: Some(uploaded),
            error: None,
        }
    }

    fn failed(index: usize, attempts: u32, error: String) -> Self {
        Self {
            index,
            state: PartState::Failed,
            attempts,
            uploaded: None,
            error: Some(error),
        }
    }
}

/// 分片上传器
///
/// 无状态（配置除外），可以被所有 worker 共享
pub struct PartUploader {
    service: Arc<dyn StorageService>,
    payload: Arc<dyn PayloadSource>,
    aggregator: Arc<ChecksumAggregator>,
    policy: RetryPolicy,
}

impl PartUploader {
    pub fn new(
        service: Arc<dyn StorageService>,
        payload: Arc<dyn PayloadSource>,
        aggregator: Arc<ChecksumAggregator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            payload,
            aggregator,
            policy,
        }
    }

    /// 上传一个分片（带重试）
    ///
    /// 成功时把分片字节喂给摘要聚合器；失败只体现在返回的 outcome 里
    pub async fn upload(
        &self,
        session: &UploadSession,
        task: PartTask,
        cancel: &CancellationToken,
    ) -> PartOutcome {
        let total_size = self.payload.len();

        debug!(
            "[分片#{}] 开始上传: offset={}, size={}, total_size={}",
            task.index, task.offset, task.size, total_size
        );

        // 读取分片数据；本地读失败不重试
        let bytes = match self.payload.read_range(task.offset, task.size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = StorageError::PayloadRead(e.to_string());
                error!("[分片#{}] ❌ {}", task.index, err);
                return PartOutcome::failed(task.index, 0, err.to_string());
            }
        };

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                warn!("[分片#{}] 上传已取消", task.index);
                return PartOutcome::failed(task.index, attempts, "上传已取消".to_string());
            }

            attempts += 1;
            match self
                .service
                .upload_part(session, &bytes, task.offset, total_size)
                .await
            {
                Ok(uploaded) => {
                    if let Err(e) = self.aggregator.record(task.index, &bytes) {
                        // 只会因重复记录等内部错误触发
                        error!("[分片#{}] 摘要记录失败: {}", task.index, e);
                        return PartOutcome::failed(task.index, attempts, e.to_string());
                    }
                    info!(
                        "[分片#{}] ✓ 上传成功 (尝试 {} 次, {} bytes)",
                        task.index, attempts, task.size
                    );
                    return PartOutcome::succeeded(task.index, attempts, uploaded);
                }
                Err(e) => match self.policy.decide(attempts, &e) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            "[分片#{}] 上传失败, {}ms 后重试 ({}/{}): {}",
                            task.index,
                            delay.as_millis(),
                            attempts,
                            self.policy.max_retries() + 1,
                            e
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {}
                        }
                    }
                    RetryDecision::GiveUp => {
                        error!(
                            "[分片#{}] ❌ 上传失败, 不再重试 (尝试 {} 次): {}",
                            task.index, attempts, e
                        );
                        return PartOutcome::failed(task.index, attempts, e.to_string());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxapi::{CommittedFile, UploadDestination};
    use crate::payload::FillerPayload;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// 按分片偏移注入失败次数的存储服务
    struct FlakyService {
        /// offset -> 剩余失败次数（负数表示永远失败）
        failures: Mutex<std::collections::HashMap<u64, i32>>,
        /// 注入的错误是否可重试
        retriable: bool,
        calls: Mutex<u32>,
    }

    impl FlakyService {
        fn new(failures: &[(u64, i32)], retriable: bool) -> Self {
            Self {
                failures: Mutex::new(failures.iter().copied().collect()),
                retriable,
                calls: Mutex::new(0),
            }
        }

        fn make_error(&self) -> StorageError {
            if self.retriable {
                StorageError::Network("connection reset".into())
            } else {
                StorageError::Auth("token expired".into())
            }
        }
    }

    #[async_trait]
    impl StorageService for FlakyService {
        async fn create_upload_session(
            &self,
            _payload_size: u64,
            _file_name: &str,
            _destination: &UploadDestination,
        ) -> Result<UploadSession, StorageError> {
            unreachable!("分片测试不创建会话")
        }

        async fn upload_part(
            &self,
            _session: &UploadSession,
            bytes: &[u8],
            offset: u64,
            _total_size: u64,
        ) -> Result<UploadedPart, StorageError> {
            *self.calls.lock() += 1;
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&offset) {
                if *remaining != 0 {
                    if *remaining > 0 {
                        *remaining -= 1;
                    }
                    return Err(self.make_error());
                }
            }
            Ok(UploadedPart {
                part_id: format!("part-{offset}"),
                offset,
                size: bytes.len() as u64,
                sha1: String::new(),
            })
        }

        async fn commit_session(
            &self,
            _session: &UploadSession,
            _digest: &str,
            _parts: &[UploadedPart],
        ) -> Result<CommittedFile, StorageError> {
            unreachable!("分片测试不提交会话")
        }
    }

    fn session() -> UploadSession {
        UploadSession {
            id: "sess-1".into(),
            part_size: 4,
            total_parts: 1,
        }
    }

    fn uploader(
        service: Arc<FlakyService>,
        total_parts: usize,
    ) -> (PartUploader, Arc<ChecksumAggregator>) {
        let aggregator = Arc::new(ChecksumAggregator::new(total_parts));
        let uploader = PartUploader::new(
            service,
            Arc::new(FillerPayload::new(4)),
            aggregator.clone(),
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        (uploader, aggregator)
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let service = Arc::new(FlakyService::new(&[], true));
        let (up, agg) = uploader(service.clone(), 1);
        let task = PartTask { index: 0, offset: 0, size: 4 };

        let outcome = up.upload(&session(), task, &CancellationToken::new()).await;
        assert_eq!(outcome.state, PartState::Succeeded);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.uploaded.is_some());
        assert_eq!(agg.recorded_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        // 前 2 次失败，第 3 次成功
        let service = Arc::new(FlakyService::new(&[(0, 2)], true));
        let (up, _agg) = uploader(service.clone(), 1);
        let task = PartTask { index: 0, offset: 0, size: 4 };

        let outcome = up.upload(&session(), task, &CancellationToken::new()).await;
        assert_eq!(outcome.state, PartState::Succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(*service.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted_is_permanent_failure() {
        // 永远失败：4 次尝试（1 + 3 重试）后放弃
        let service = Arc::new(FlakyService::new(&[(0, -1)], true));
        let (up, agg) = uploader(service.clone(), 1);
        let task = PartTask { index: 0, offset: 0, size: 4 };

        let outcome = up.upload(&session(), task, &CancellationToken::new()).await;
        assert_eq!(outcome.state, PartState::Failed);
        assert_eq!(outcome.attempts, 4);
        assert!(outcome.error.is_some());
        // 失败的分片不能污染摘要
        assert_eq!(agg.recorded_count(), 0);
    }

    #[tokio::test]
    async fn test_non_retriable_fails_immediately() {
        let service = Arc::new(FlakyService::new(&[(0, -1)], false));
        let (up, _agg) = uploader(service.clone(), 1);
        let task = PartTask { index: 0, offset: 0, size: 4 };

        let outcome = up.upload(&session(), task, &CancellationToken::new()).await;
        assert_eq!(outcome.state, PartState::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(*service.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_attempt() {
        let service = Arc::new(FlakyService::new(&[], true));
        let (up, _agg) = uploader(service.clone(), 1);
        let task = PartTask { index: 0, offset: 0, size: 4 };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = up.upload(&session(), task, &cancel).await;
        assert_eq!(outcome.state, PartState::Failed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(*service.calls.lock(), 0);
    }
}
