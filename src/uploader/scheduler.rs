// 上传调度器
//
// 有界并发 worker 池：Semaphore 控制同时在途的分片数，JoinSet 管理
// worker 生命周期。分片按索引升序派发，完成顺序不做任何假设。
// 单个分片永久失败不会取消其他在途分片——所有分片都会被推进到
// 成功或永久失败，调度器才返回

use crate::boxapi::{UploadSession, UploadedPart};
use crate::uploader::part::{PartOutcome, PartState, PartUploader};
use crate::uploader::planner::PartTask;
use crate::uploader::UploadError;
use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 调度结果
///
/// 每个分片一条 outcome（按索引有序），保留到会话结束供诊断
#[derive(Debug)]
pub struct SchedulerResult {
    pub outcomes: Vec<PartOutcome>,
}

impl SchedulerResult {
    /// 成功分片数
    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == PartState::Succeeded)
            .count()
    }

    /// 永久失败的分片索引（升序）
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.state == PartState::Failed)
            .map(|o| o.index)
            .collect()
    }

    /// 是否全部成功（可以提交）
    pub fn is_fully_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.state == PartState::Succeeded)
    }

    /// 服务端分片记录（按索引升序，commit 用）
    pub fn uploaded_parts(&self) -> Vec<UploadedPart> {
        self.outcomes
            .iter()
            .filter_map(|o| o.uploaded.clone())
            .collect()
    }
}

/// 上传调度器
pub struct UploadScheduler {
    uploader: Arc<PartUploader>,
    cancel: CancellationToken,
}

impl UploadScheduler {
    pub fn new(uploader: Arc<PartUploader>, cancel: CancellationToken) -> Self {
        Self { uploader, cancel }
    }

    /// 运行调度，直到所有分片到达终态
    ///
    /// 并发数高于分片数时收紧为分片数（记录日志，不视为错误）
    pub async fn run(
        &self,
        session: Arc<UploadSession>,
        tasks: Vec<PartTask>,
        concurrency: usize,
    ) -> Result<SchedulerResult, UploadError> {
        if concurrency < 1 {
            return Err(UploadError::Other(anyhow!("并发数必须 >= 1")));
        }

        let total = tasks.len();
        if total == 0 {
            return Ok(SchedulerResult { outcomes: vec![] });
        }

        let effective = concurrency.min(total);
        if concurrency > total {
            info!(
                "🤔 并发数 ({}) 高于分片数 ({}), 收紧为 {}",
                concurrency, total, effective
            );
        }
        info!("开始调度: {} 个分片, 并发数 {}", total, effective);

        let semaphore = Arc::new(Semaphore::new(effective));
        let mut join_set: JoinSet<PartOutcome> = JoinSet::new();
        let mut slots: Vec<Option<PartOutcome>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        // 按索引升序派发；permit 获取会在池满时挂起派发，
        // 不影响已在途的 worker
        for task in tasks {
            if self.cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| UploadError::Other(anyhow!("信号量已关闭: {e}")))?
                }
                _ = self.cancel.cancelled() => break,
            };

            let uploader = self.uploader.clone();
            let session = session.clone();
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                let outcome = uploader.upload(&session, task, &cancel).await;
                drop(permit);
                outcome
            });
        }

        // 取消时中止所有在途 worker，不等它们跑完
        if self.cancel.is_cancelled() {
            join_set.abort_all();
        }

        // 排空所有 worker；失败的分片不会中断其他分片
        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        let index = outcome.index;
                        slots[index] = Some(outcome);
                    }
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        error!("分片 worker 异常退出: {}", e);
                        return Err(UploadError::Other(anyhow!("分片 worker 异常退出: {e}")));
                    }
                    None => break,
                },
                _ = self.cancel.cancelled(), if !self.cancel.is_cancelled() => {
                    join_set.abort_all();
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let outcomes: Vec<PartOutcome> = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| UploadError::Other(anyhow!("存在未派发的分片")))?;

        let result = SchedulerResult { outcomes };
        info!(
            "调度完成: {}/{} 成功, 失败索引 {:?}",
            result.succeeded_count(),
            total,
            result.failed_indices()
        );
        Ok(result)
    }
}
